//! Slot Store and Booking Ledger.
//!
//! Committed rows live in `DashMap`s. All mutation goes through a
//! [`Transaction`]: it holds the row locks of the slots it touches, stages
//! changes privately, and on commit becomes exactly one WAL record that is then
//! published to readers in one step. Dropping a transaction is a rollback.

mod tx;

pub use tx::Transaction;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::WalHandle;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("booking already exists: {0}")]
    Duplicate(BookingId),
    #[error("slot {0} is not locked by this transaction")]
    RowNotLocked(SlotId),
    #[error("booking {id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn slot_not_found(id: SlotId) -> Self {
        StoreError::NotFound { entity: "slot", id }
    }

    pub(crate) fn booking_not_found(id: BookingId) -> Self {
        StoreError::NotFound { entity: "booking", id }
    }
}

/// Slot rows as seen from inside a transactional scope.
pub trait SlotStore {
    fn get_slot(&self, id: &SlotId) -> Result<Slot, StoreError>;

    /// Set `new` only if the slot currently has `expected`. The slot must be
    /// row-locked by the scope.
    fn compare_and_set_status(
        &mut self,
        id: &SlotId,
        expected: SlotStatus,
        new: SlotStatus,
    ) -> Result<bool, StoreError>;

    fn list_slots(&self) -> Vec<Slot>;
}

/// Booking rows as seen from inside a transactional scope.
pub trait BookingLedger {
    fn insert_booking(&mut self, booking: Booking) -> Result<BookingId, StoreError>;

    fn get_booking(&self, id: &BookingId) -> Result<Booking, StoreError>;

    /// Rejects transitions that `BookingStatus::can_transition_to` forbids.
    fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), StoreError>;

    /// Newest `created_at` first.
    fn list_bookings(&self) -> Vec<Booking>;
}

/// The capability the reservation engine needs from persistence.
#[async_trait]
pub trait TransactionalStore: Send + Sync + 'static {
    type Tx: SlotStore + BookingLedger + Send;

    /// Open a scope holding the row locks of `rows` until commit or drop.
    async fn begin(&self, rows: &[SlotId]) -> Result<Self::Tx, StoreError>;

    /// Make every staged mutation durable and visible, all at once.
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    // Committed reads, outside any scope.

    fn slot(&self, id: &SlotId) -> Option<Slot>;

    fn booking(&self, id: &BookingId) -> Option<Booking>;

    fn slots(&self) -> Vec<Slot>;

    fn bookings(&self) -> Vec<Booking>;
}

pub(crate) fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) struct Tables {
    slots: DashMap<SlotId, Slot>,
    bookings: DashMap<BookingId, Booking>,
    row_locks: DashMap<SlotId, Arc<Mutex<()>>>,
    /// Held exclusively while a commit is published, shared by multi-row reads.
    visibility: RwLock<()>,
}

impl Tables {
    fn new() -> Self {
        Self {
            slots: DashMap::new(),
            bookings: DashMap::new(),
            row_locks: DashMap::new(),
            visibility: RwLock::new(()),
        }
    }

    pub(crate) fn slot(&self, id: &SlotId) -> Option<Slot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub(crate) fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub(crate) fn slots(&self) -> Vec<Slot> {
        let _visible = self.visibility.read().unwrap_or_else(PoisonError::into_inner);
        let mut slots: Vec<Slot> = self.slots.iter().map(|e| e.value().clone()).collect();
        slots.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        slots
    }

    pub(crate) fn bookings(&self) -> Vec<Booking> {
        let _visible = self.visibility.read().unwrap_or_else(PoisonError::into_inner);
        let mut bookings: Vec<Booking> =
            self.bookings.iter().map(|e| e.value().clone()).collect();
        newest_first(&mut bookings);
        bookings
    }

    /// Apply a replayed or freshly persisted event. Monitor events are ignored here.
    fn restore(&self, event: &Event) {
        match event {
            Event::SlotProvisioned { id, label } => {
                self.slots.insert(
                    *id,
                    Slot {
                        id: *id,
                        label: label.clone(),
                        status: SlotStatus::Available,
                    },
                );
            }
            Event::Committed { mutations } => self.publish(mutations),
            Event::OperationObserved { .. } | Event::MonitorRestored(_) => {}
        }
    }

    fn publish(&self, mutations: &[Mutation]) {
        let _visible = self.visibility.write().unwrap_or_else(PoisonError::into_inner);
        for mutation in mutations {
            self.apply(mutation);
        }
    }

    fn apply(&self, mutation: &Mutation) {
        match mutation {
            Mutation::BookingInserted(booking) => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Mutation::BookingStatusSet { id, status } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.status = *status;
                }
            }
            Mutation::SlotStatusSet { id, status } => {
                if let Some(mut slot) = self.slots.get_mut(id) {
                    if slot.status != *status {
                        let delta = match status {
                            SlotStatus::Occupied => 1.0,
                            SlotStatus::Available => -1.0,
                        };
                        metrics::gauge!(crate::observability::SLOTS_OCCUPIED).increment(delta);
                    }
                    slot.status = *status;
                }
            }
        }
    }
}

pub struct Store {
    tables: Arc<Tables>,
    wal: Option<WalHandle>,
    provisioning: Arc<Mutex<()>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// A store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self {
            tables: Arc::new(Tables::new()),
            wal: None,
            provisioning: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_wal(wal: WalHandle) -> Self {
        Self {
            wal: Some(wal),
            ..Self::in_memory()
        }
    }

    pub fn wal(&self) -> Option<&WalHandle> {
        self.wal.as_ref()
    }

    pub fn slot_count(&self) -> usize {
        self.tables.slots.len()
    }

    pub fn booking_count(&self) -> usize {
        self.tables.bookings.len()
    }

    /// Create an `available` slot labelled `label`, or return the slot that
    /// already carries that label.
    pub async fn provision_slot(&self, label: &str) -> Result<Slot, StoreError> {
        let label = label.trim();
        if label.is_empty() || label.len() > MAX_SLOT_LABEL_LEN {
            return Err(StoreError::LimitExceeded("slot label must be 1-32 bytes"));
        }
        let provisioning = self.provisioning.clone().lock_owned().await;
        if let Some(existing) = self.tables.slots.iter().find(|e| e.label == label) {
            return Ok(existing.value().clone());
        }
        if self.tables.slots.len() >= MAX_SLOTS {
            return Err(StoreError::LimitExceeded("too many slots"));
        }

        let id = Ulid::new();
        let event = Event::SlotProvisioned {
            id,
            label: label.to_string(),
        };
        self.persist_and_apply(event, vec![provisioning]).await?;
        self.tables.slot(&id).ok_or(StoreError::slot_not_found(id))
    }

    /// WAL-append (when durable) and publish, under the compaction checkpoint.
    ///
    /// The append and the publish run in their own task, which also owns
    /// `held` until the event is visible. Dropping the caller mid-commit
    /// therefore cannot leave a record on disk that memory never saw.
    async fn persist_and_apply(
        &self,
        event: Event,
        held: Vec<OwnedMutexGuard<()>>,
    ) -> Result<(), StoreError> {
        let Some(wal) = self.wal.clone() else {
            self.tables.restore(&event);
            return Ok(());
        };
        let tables = self.tables.clone();
        let commit = tokio::spawn(async move {
            let _held = held;
            let _checkpoint = wal.checkpoint().await;
            wal.append(&event).await?;
            tables.restore(&event);
            Ok::<(), StoreError>(())
        });
        commit
            .await
            .map_err(|e| StoreError::Wal(std::io::Error::other(e)))?
    }

    /// Apply a replayed event. Monitor events are ignored here.
    pub fn restore(&self, event: &Event) {
        self.tables.restore(event);
    }

    /// Minimal event sequence that recreates the committed tables.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let _visible = self
            .tables
            .visibility
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut events = Vec::new();
        let mut mutations = Vec::new();
        for entry in self.tables.slots.iter() {
            let slot = entry.value();
            events.push(Event::SlotProvisioned {
                id: slot.id,
                label: slot.label.clone(),
            });
            if slot.status == SlotStatus::Occupied {
                mutations.push(Mutation::SlotStatusSet {
                    id: slot.id,
                    status: SlotStatus::Occupied,
                });
            }
        }
        for entry in self.tables.bookings.iter() {
            mutations.push(Mutation::BookingInserted(entry.value().clone()));
        }
        if !mutations.is_empty() {
            events.push(Event::Committed { mutations });
        }
        events
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }
}

#[async_trait]
impl TransactionalStore for Store {
    type Tx = Transaction;

    async fn begin(&self, rows: &[SlotId]) -> Result<Transaction, StoreError> {
        // Sorted acquisition order prevents deadlocks between multi-row scopes.
        let mut ids = rows.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if !self.tables.slots.contains_key(id) {
                return Err(StoreError::slot_not_found(*id));
            }
            let lock = self.tables.row_locks.entry(*id).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        Ok(Transaction::new(self.tables.clone(), ids, guards))
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        // Row locks stay held until the mutations are visible.
        let (mutations, rows) = tx.into_parts();
        if mutations.is_empty() {
            return Ok(());
        }
        self.persist_and_apply(Event::Committed { mutations }, rows)
            .await
    }

    fn slot(&self, id: &SlotId) -> Option<Slot> {
        self.tables.slot(id)
    }

    fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.tables.booking(id)
    }

    fn slots(&self) -> Vec<Slot> {
        self.tables.slots()
    }

    fn bookings(&self) -> Vec<Booking> {
        self.tables.bookings()
    }
}
