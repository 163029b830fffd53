mod error;
mod mutations;
mod queries;
mod validate;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::io;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::model::*;
use crate::monitor::OperationMonitor;
use crate::store::{Store, StoreError, TransactionalStore};
use crate::wal::{Wal, WalHandle};

pub const CREATE_BOOKING: &str = "create_booking";
pub const CANCEL_BOOKING: &str = "cancel_booking";
pub const ADVANCE_BOOKING: &str = "advance_booking";
pub const LIST_SLOTS: &str = "list_slots";
pub const LIST_BOOKINGS: &str = "list_bookings";

/// The reservation engine. The only component that mutates slots and
/// bookings, always both inside one transactional scope.
pub struct Engine<S: TransactionalStore = Store> {
    store: S,
    monitor: OperationMonitor,
}

impl<S: TransactionalStore> Engine<S> {
    pub fn new(store: S, monitor: OperationMonitor) -> Self {
        Self { store, monitor }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn monitor(&self) -> &OperationMonitor {
        &self.monitor
    }

    /// Run `work` inside one scope locking `rows`. Commits on `Ok`; on `Err`
    /// the scope is dropped, which discards every staged write.
    pub(super) async fn with_transaction<T, F>(
        &self,
        operation: &'static str,
        rows: &[SlotId],
        work: F,
    ) -> Result<T, EngineError>
    where
        T: Send,
        F: FnOnce(&mut S::Tx) -> Result<T, EngineError> + Send,
    {
        let mut tx = self
            .store
            .begin(rows)
            .await
            .map_err(|e| EngineError::from_store(operation, e))?;

        match work(&mut tx) {
            Ok(value) => {
                self.store
                    .commit(tx)
                    .await
                    .map_err(|e| EngineError::from_store(operation, e))?;
                Ok(value)
            }
            Err(e) => {
                drop(tx);
                metrics::counter!(
                    crate::observability::TRANSACTIONS_ROLLED_BACK_TOTAL,
                    "operation" => operation
                )
                .increment(1);
                debug!("{operation}: rolled back: {e}");
                Err(e)
            }
        }
    }

    /// Count the outcome and report the latency. Monitoring never changes `result`.
    pub(super) async fn finish<T: Send>(
        &self,
        operation: &'static str,
        started: Instant,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let elapsed = started.elapsed();
        metrics::counter!(
            crate::observability::OPERATIONS_TOTAL,
            "operation" => operation,
            "outcome" => crate::observability::outcome_label(&result)
        )
        .increment(1);
        if let Err(e) = self.monitor.record(operation, elapsed).await {
            warn!("{operation}: monitor update failed: {e}");
        }
        result
    }
}

impl Engine<Store> {
    /// Replay the WAL at `wal_path` and start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = WalHandle::spawn(Wal::open(wal_path)?);
        let store = Store::with_wal(wal.clone());
        let monitor = OperationMonitor::with_wal(wal);

        for event in &events {
            match event {
                Event::OperationObserved { .. } | Event::MonitorRestored(_) => {
                    monitor.restore(event)
                }
                Event::SlotProvisioned { .. } | Event::Committed { .. } => store.restore(event),
            }
        }
        info!(
            "replayed {} events: {} slots, {} bookings, {} monitor records",
            events.len(),
            store.slot_count(),
            store.booking_count(),
            monitor.len()
        );
        Ok(Self::new(store, monitor))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(wal) = self.store.wal() else {
            return Ok(());
        };
        let _exclusive = wal.exclusive().await;
        let mut events = self.store.snapshot_events();
        events.extend(self.monitor.snapshot_events());
        wal.compact(events).await?;
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.store.wal_appends_since_compact().await
    }
}
