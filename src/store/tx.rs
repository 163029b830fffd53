use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::model::*;

use super::{newest_first, BookingLedger, SlotStore, StoreError, Tables};

/// A unit of work over the slot and booking tables.
///
/// Reads see committed rows overlaid with this scope's own staged writes.
/// Nothing is visible to anyone else until `TransactionalStore::commit`;
/// dropping the value discards the staged writes and releases the row locks.
pub struct Transaction {
    tables: Arc<Tables>,
    locked: Vec<SlotId>,
    rows: Vec<OwnedMutexGuard<()>>,
    slots: HashMap<SlotId, Slot>,
    bookings: HashMap<BookingId, Booking>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub(super) fn new(
        tables: Arc<Tables>,
        locked: Vec<SlotId>,
        rows: Vec<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            tables,
            locked,
            rows,
            slots: HashMap::new(),
            bookings: HashMap::new(),
            mutations: Vec::new(),
        }
    }

    /// Staged mutations, in the order they were made.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub(super) fn into_parts(self) -> (Vec<Mutation>, Vec<OwnedMutexGuard<()>>) {
        (self.mutations, self.rows)
    }

    fn ensure_locked(&self, slot_id: &SlotId) -> Result<(), StoreError> {
        if self.locked.binary_search(slot_id).is_ok() {
            Ok(())
        } else {
            Err(StoreError::RowNotLocked(*slot_id))
        }
    }
}

impl SlotStore for Transaction {
    fn get_slot(&self, id: &SlotId) -> Result<Slot, StoreError> {
        if let Some(staged) = self.slots.get(id) {
            return Ok(staged.clone());
        }
        self.tables
            .slot(id)
            .ok_or(StoreError::slot_not_found(*id))
    }

    fn compare_and_set_status(
        &mut self,
        id: &SlotId,
        expected: SlotStatus,
        new: SlotStatus,
    ) -> Result<bool, StoreError> {
        self.ensure_locked(id)?;
        let mut slot = self.get_slot(id)?;
        if slot.status != expected {
            return Ok(false);
        }
        slot.status = new;
        self.slots.insert(*id, slot);
        self.mutations.push(Mutation::SlotStatusSet { id: *id, status: new });
        Ok(true)
    }

    fn list_slots(&self) -> Vec<Slot> {
        let mut slots = self.tables.slots();
        for slot in &mut slots {
            if let Some(staged) = self.slots.get(&slot.id) {
                *slot = staged.clone();
            }
        }
        slots
    }
}

impl BookingLedger for Transaction {
    fn insert_booking(&mut self, booking: Booking) -> Result<BookingId, StoreError> {
        self.ensure_locked(&booking.slot_id)?;
        self.get_slot(&booking.slot_id)?;
        if self.bookings.contains_key(&booking.id) || self.tables.booking(&booking.id).is_some() {
            return Err(StoreError::Duplicate(booking.id));
        }
        let id = booking.id;
        self.mutations.push(Mutation::BookingInserted(booking.clone()));
        self.bookings.insert(id, booking);
        Ok(id)
    }

    fn get_booking(&self, id: &BookingId) -> Result<Booking, StoreError> {
        if let Some(staged) = self.bookings.get(id) {
            return Ok(staged.clone());
        }
        self.tables
            .booking(id)
            .ok_or(StoreError::booking_not_found(*id))
    }

    fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        let mut booking = self.get_booking(id)?;
        self.ensure_locked(&booking.slot_id)?;
        if !booking.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from: booking.status,
                to: status,
            });
        }
        booking.status = status;
        self.bookings.insert(*id, booking);
        self.mutations.push(Mutation::BookingStatusSet { id: *id, status });
        Ok(())
    }

    fn list_bookings(&self) -> Vec<Booking> {
        let mut bookings = self.tables.bookings();
        for booking in &mut bookings {
            if let Some(staged) = self.bookings.get(&booking.id) {
                *booking = staged.clone();
            }
        }
        for (id, staged) in &self.bookings {
            if self.tables.booking(id).is_none() {
                bookings.push(staged.clone());
            }
        }
        newest_first(&mut bookings);
        bookings
    }
}
