use std::collections::HashMap;
use std::time::Instant;

use crate::model::*;
use crate::store::{Store, TransactionalStore};

use super::{Engine, EngineError, LIST_BOOKINGS, LIST_SLOTS};

impl<S: TransactionalStore> Engine<S> {
    /// Every slot, ordered by label.
    pub async fn list_slots(&self) -> Result<Vec<Slot>, EngineError> {
        let started = Instant::now();
        let slots = self.store.slots();
        self.finish(LIST_SLOTS, started, Ok(slots)).await
    }

    /// Every booking joined with its slot label, newest first.
    pub async fn list_bookings(&self) -> Result<Vec<BookingInfo>, EngineError> {
        let started = Instant::now();
        let labels: HashMap<SlotId, String> = self
            .store
            .slots()
            .into_iter()
            .map(|s| (s.id, s.label))
            .collect();
        let bookings = self
            .store
            .bookings()
            .into_iter()
            .map(|booking| BookingInfo {
                slot_label: labels.get(&booking.slot_id).cloned(),
                booking,
            })
            .collect();
        self.finish(LIST_BOOKINGS, started, Ok(bookings)).await
    }

    pub fn get_slot(&self, id: &SlotId) -> Result<Slot, EngineError> {
        self.store.slot(id).ok_or(EngineError::slot_not_found(*id))
    }

    pub fn get_booking(&self, id: &BookingId) -> Result<Booking, EngineError> {
        self.store
            .booking(id)
            .ok_or(EngineError::booking_not_found(*id))
    }

    /// Monitor records, largest total latency first.
    pub fn monitor_report(&self) -> Vec<MonitorRecord> {
        self.monitor.list()
    }
}

impl Engine<Store> {
    pub async fn store_status(&self) -> StoreStatus {
        StoreStatus {
            tables: vec![
                TableInfo {
                    name: "slots",
                    records: self.store.slot_count(),
                },
                TableInfo {
                    name: "bookings",
                    records: self.store.booking_count(),
                },
                TableInfo {
                    name: "operation_monitor",
                    records: self.monitor.len(),
                },
            ],
            wal_appends_since_compact: self.wal_appends_since_compact().await,
        }
    }
}
