use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use ulid::Ulid;

use super::*;
use crate::store::{BookingLedger, SlotStore, Transaction};

const H: Ms = 3_600_000; // 1 hour in ms
const T0: Ms = 1_800_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("parkd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn engine_with_slots(labels: &[&str]) -> (Engine, Vec<Slot>) {
    let store = Store::in_memory();
    let mut slots = Vec::new();
    for label in labels {
        slots.push(store.provision_slot(label).await.unwrap());
    }
    (Engine::new(store, OperationMonitor::in_memory()), slots)
}

fn request(slot_id: SlotId) -> BookingRequest {
    BookingRequest {
        slot_id,
        vehicle_number: "KA01AB1234".into(),
        window: Window::new(T0, T0 + 2 * H),
        total_cost: 20.0,
    }
}

/// Every slot is occupied iff exactly one live booking holds it.
fn assert_consistent<S: TransactionalStore>(engine: &Engine<S>) {
    let mut live: HashMap<SlotId, usize> = HashMap::new();
    for booking in engine.store().bookings() {
        if booking.status.is_live() {
            *live.entry(booking.slot_id).or_default() += 1;
        }
    }
    for slot in engine.store().slots() {
        let holders = live.get(&slot.id).copied().unwrap_or(0);
        assert!(holders <= 1, "slot {} has {holders} live bookings", slot.label);
        assert_eq!(
            slot.status == SlotStatus::Occupied,
            holders == 1,
            "slot {} is {} with {holders} live bookings",
            slot.label,
            slot.status
        );
    }
}

// ── create_booking ───────────────────────────────────────

#[tokio::test]
async fn create_booking_occupies_slot() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let slot = &slots[0];

    let mut req = request(slot.id);
    req.vehicle_number = "  KA01AB1234 ".into();
    let id = engine.create_booking(req).await.unwrap();

    let booking = engine.get_booking(&id).unwrap();
    assert_eq!(booking.status, BookingStatus::Upcoming);
    assert_eq!(booking.vehicle_number, "KA01AB1234");
    assert_eq!(booking.window, Window::new(T0, T0 + 2 * H));
    assert_eq!(engine.get_slot(&slot.id).unwrap().status, SlotStatus::Occupied);
    assert_consistent(&engine);
}

#[tokio::test]
async fn create_booking_validation() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let slot_id = slots[0].id;

    let cases: Vec<BookingRequest> = vec![
        BookingRequest {
            vehicle_number: "   ".into(),
            ..request(slot_id)
        },
        BookingRequest {
            vehicle_number: "X".repeat(crate::limits::MAX_VEHICLE_LEN + 1),
            ..request(slot_id)
        },
        BookingRequest {
            window: Window::new(T0, T0),
            ..request(slot_id)
        },
        BookingRequest {
            window: Window::new(T0 + H, T0),
            ..request(slot_id)
        },
        BookingRequest {
            window: Window::new(0, H),
            ..request(slot_id)
        },
        BookingRequest {
            window: Window::new(T0, T0 + crate::limits::MAX_BOOKING_WINDOW_MS + 1),
            ..request(slot_id)
        },
        BookingRequest {
            total_cost: -1.0,
            ..request(slot_id)
        },
        BookingRequest {
            total_cost: f64::NAN,
            ..request(slot_id)
        },
    ];
    for req in cases {
        let err = engine.create_booking(req.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{req:?} -> {err}");
    }

    assert_eq!(engine.store().booking_count(), 0);
    assert_eq!(engine.get_slot(&slot_id).unwrap().status, SlotStatus::Available);
    // Rejected attempts are still observed.
    assert_eq!(engine.monitor().get(CREATE_BOOKING).unwrap().count, 8);
}

#[tokio::test]
async fn create_booking_unknown_slot() {
    let (engine, _) = engine_with_slots(&["A1"]).await;
    let err = engine.create_booking(request(Ulid::new())).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "slot", .. }));
    assert_eq!(engine.store().booking_count(), 0);
}

#[tokio::test]
async fn create_booking_on_occupied_slot_conflicts() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    engine.create_booking(request(slots[0].id)).await.unwrap();

    let err = engine.create_booking(request(slots[0].id)).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { operation: CREATE_BOOKING, .. }));
    assert_eq!(engine.store().booking_count(), 1);
    assert_consistent(&engine);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_one_slot_admit_exactly_one() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let engine = Arc::new(engine);
    let slot_id = slots[0].id;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut req = request(slot_id);
                req.vehicle_number = format!("CAR{i}");
                engine.create_booking(req).await
            })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(engine.store().booking_count(), 1);
    assert_eq!(engine.monitor().get(CREATE_BOOKING).unwrap().count, 16);
    assert_consistent(&engine);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_distinct_slots_all_succeed() {
    let labels: Vec<String> = (0..12).map(|i| format!("S{i:02}")).collect();
    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    let (engine, slots) = engine_with_slots(&label_refs).await;
    let engine = Arc::new(engine);

    let handles: Vec<_> = slots
        .iter()
        .map(|slot| {
            let engine = engine.clone();
            let slot_id = slot.id;
            tokio::spawn(async move { engine.create_booking(request(slot_id)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(engine
        .store()
        .slots()
        .iter()
        .all(|s| s.status == SlotStatus::Occupied));
    assert_consistent(&engine);
}

// ── cancel_booking ───────────────────────────────────────

#[tokio::test]
async fn cancel_releases_slot() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let id = engine.create_booking(request(slots[0].id)).await.unwrap();

    assert_eq!(engine.cancel_booking(id).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(engine.get_booking(&id).unwrap().status, BookingStatus::Cancelled);
    assert_eq!(engine.get_slot(&slots[0].id).unwrap().status, SlotStatus::Available);
    assert_consistent(&engine);
}

#[tokio::test]
async fn cancel_unknown_booking() {
    let (engine, _) = engine_with_slots(&["A1"]).await;
    let err = engine.cancel_booking(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "booking", .. }));
    assert_eq!(engine.monitor().get(CANCEL_BOOKING).unwrap().count, 1);
}

#[tokio::test]
async fn recancel_does_not_release_rebooked_slot() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let slot_id = slots[0].id;
    let first = engine.create_booking(request(slot_id)).await.unwrap();
    engine.cancel_booking(first).await.unwrap();
    let second = engine.create_booking(request(slot_id)).await.unwrap();

    assert_eq!(
        engine.cancel_booking(first).await.unwrap(),
        CancelOutcome::AlreadyCancelled
    );
    assert_eq!(engine.get_slot(&slot_id).unwrap().status, SlotStatus::Occupied);
    assert_eq!(engine.get_booking(&second).unwrap().status, BookingStatus::Upcoming);
    assert_consistent(&engine);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_release_once() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let engine = Arc::new(engine);
    let id = engine.create_booking(request(slots[0].id)).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.cancel_booking(id).await })
        })
        .collect();
    let mut cancelled = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            CancelOutcome::Cancelled => cancelled += 1,
            CancelOutcome::AlreadyCancelled => {}
        }
    }
    assert_eq!(cancelled, 1);
    assert_consistent(&engine);
}

#[tokio::test]
async fn cancel_active_or_completed_is_invalid_state() {
    let (engine, slots) = engine_with_slots(&["A1", "A2"]).await;
    let active = engine.create_booking(request(slots[0].id)).await.unwrap();
    let done = engine.create_booking(request(slots[1].id)).await.unwrap();

    assert_eq!(
        engine.advance_booking(active, T0).await.unwrap(),
        Some(BookingStatus::Active)
    );
    assert_eq!(
        engine.advance_booking(done, T0 + 2 * H).await.unwrap(),
        Some(BookingStatus::Completed)
    );

    let err = engine.cancel_booking(active).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState { status: BookingStatus::Active, .. }
    ));
    let err = engine.cancel_booking(done).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState { status: BookingStatus::Completed, .. }
    ));

    assert_eq!(engine.get_slot(&slots[0].id).unwrap().status, SlotStatus::Occupied);
    assert_eq!(engine.get_slot(&slots[1].id).unwrap().status, SlotStatus::Available);
    assert_consistent(&engine);
}

// ── promoter sweep ───────────────────────────────────────

#[tokio::test]
async fn advance_due_walks_lifecycle() {
    let (engine, slots) = engine_with_slots(&["A1", "A2", "A3"]).await;
    let past = engine
        .create_booking(BookingRequest {
            window: Window::new(T0 - 3 * H, T0 - H),
            ..request(slots[0].id)
        })
        .await
        .unwrap();
    let current = engine
        .create_booking(BookingRequest {
            window: Window::new(T0 - H, T0 + H),
            ..request(slots[1].id)
        })
        .await
        .unwrap();
    let future = engine
        .create_booking(BookingRequest {
            window: Window::new(T0 + H, T0 + 2 * H),
            ..request(slots[2].id)
        })
        .await
        .unwrap();

    let mut advanced = engine.advance_due(T0).await;
    advanced.sort_by_key(|(id, _)| *id);
    let mut expected = vec![
        (past, BookingStatus::Completed),
        (current, BookingStatus::Active),
    ];
    expected.sort_by_key(|(id, _)| *id);
    assert_eq!(advanced, expected);
    assert_eq!(engine.get_booking(&future).unwrap().status, BookingStatus::Upcoming);
    assert_eq!(engine.get_slot(&slots[0].id).unwrap().status, SlotStatus::Available);
    assert_eq!(engine.get_slot(&slots[1].id).unwrap().status, SlotStatus::Occupied);
    assert_consistent(&engine);

    // Nothing further is due at the same instant.
    assert!(engine.advance_due(T0).await.is_empty());
}

// ── listing and monitor ──────────────────────────────────

#[tokio::test]
async fn list_bookings_joins_slot_labels() {
    let (engine, slots) = engine_with_slots(&["A1", "B1"]).await;
    let first = engine.create_booking(request(slots[0].id)).await.unwrap();
    let second = engine.create_booking(request(slots[1].id)).await.unwrap();

    let listed = engine.list_bookings().await.unwrap();
    assert_eq!(listed.len(), 2);
    let ids: Vec<BookingId> = listed.iter().map(|b| b.booking.id).collect();
    assert!(ids.contains(&first) && ids.contains(&second));
    for info in &listed {
        let label = info.slot_label.as_deref().unwrap();
        let slot = engine.get_slot(&info.booking.slot_id).unwrap();
        assert_eq!(label, slot.label);
    }

    let slots = engine.list_slots().await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(engine.monitor().get(LIST_BOOKINGS).unwrap().count, 1);
    assert_eq!(engine.monitor().get(LIST_SLOTS).unwrap().count, 1);
}

#[tokio::test]
async fn monitor_counts_every_outcome() {
    let (engine, slots) = engine_with_slots(&["A1"]).await;
    let id = engine.create_booking(request(slots[0].id)).await.unwrap();
    let _ = engine.create_booking(request(slots[0].id)).await;
    engine.cancel_booking(id).await.unwrap();

    let report = engine.monitor_report();
    let create = report
        .iter()
        .find(|r| r.operation_label == CREATE_BOOKING)
        .unwrap();
    assert_eq!(create.count, 2);
    assert!(create.max_time >= create.avg_time);
    assert!((create.total_time - create.avg_time * 2.0).abs() < 1e-9);
    assert_eq!(engine.monitor().get(CANCEL_BOOKING).unwrap().count, 1);
}

#[tokio::test]
async fn monitor_failure_does_not_fail_operation() {
    let store = Store::in_memory();
    let slot = store.provision_slot("A1").await.unwrap();
    let engine = Engine::new(store, OperationMonitor::with_wal(WalHandle::closed()));

    let id = engine.create_booking(request(slot.id)).await.unwrap();
    assert_eq!(engine.get_booking(&id).unwrap().status, BookingStatus::Upcoming);
    assert_eq!(engine.get_slot(&slot.id).unwrap().status, SlotStatus::Occupied);
}

// ── failure injection ────────────────────────────────────

/// Delegates to a real store, but the scope fails on the slot update,
/// after the booking has already been staged.
struct FaultyStore {
    inner: Store,
}

struct FaultyTx {
    inner: Transaction,
}

impl SlotStore for FaultyTx {
    fn get_slot(&self, id: &SlotId) -> Result<Slot, StoreError> {
        self.inner.get_slot(id)
    }

    fn compare_and_set_status(
        &mut self,
        _id: &SlotId,
        _expected: SlotStatus,
        _new: SlotStatus,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Wal(std::io::Error::other("injected fault")))
    }

    fn list_slots(&self) -> Vec<Slot> {
        self.inner.list_slots()
    }
}

impl BookingLedger for FaultyTx {
    fn insert_booking(&mut self, booking: Booking) -> Result<BookingId, StoreError> {
        self.inner.insert_booking(booking)
    }

    fn get_booking(&self, id: &BookingId) -> Result<Booking, StoreError> {
        self.inner.get_booking(id)
    }

    fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        self.inner.update_booking_status(id, status)
    }

    fn list_bookings(&self) -> Vec<Booking> {
        self.inner.list_bookings()
    }
}

#[async_trait]
impl TransactionalStore for FaultyStore {
    type Tx = FaultyTx;

    async fn begin(&self, rows: &[SlotId]) -> Result<FaultyTx, StoreError> {
        Ok(FaultyTx {
            inner: self.inner.begin(rows).await?,
        })
    }

    async fn commit(&self, tx: FaultyTx) -> Result<(), StoreError> {
        self.inner.commit(tx.inner).await
    }

    fn slot(&self, id: &SlotId) -> Option<Slot> {
        self.inner.slot(id)
    }

    fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.inner.booking(id)
    }

    fn slots(&self) -> Vec<Slot> {
        self.inner.slots()
    }

    fn bookings(&self) -> Vec<Booking> {
        self.inner.bookings()
    }
}

#[tokio::test]
async fn failed_slot_update_rolls_back_booking() {
    let inner = Store::in_memory();
    let slot = inner.provision_slot("A1").await.unwrap();
    let engine = Engine::new(FaultyStore { inner }, OperationMonitor::in_memory());

    let err = engine.create_booking(request(slot.id)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Transaction {
            operation: CREATE_BOOKING,
            source: StoreError::Wal(_)
        }
    ));
    assert!(engine.store().bookings().is_empty());
    assert_eq!(engine.get_slot(&slot.id).unwrap().status, SlotStatus::Available);
    assert_consistent(&engine);

    // The row lock was released by the rollback.
    let retry = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        engine.create_booking(request(slot.id)),
    )
    .await;
    assert!(retry.is_ok());
}

// ── durability ───────────────────────────────────────────

#[tokio::test]
async fn create_dropped_mid_commit_still_lands_whole() {
    let path = test_wal_path("dropped_mid_commit.wal");
    {
        let engine = Engine::open(&path).unwrap();
        let slot = engine.store().provision_slot("A1").await.unwrap();

        // One poll gets the scope as far as waiting on the WAL, then the caller goes away.
        let first = engine.create_booking(request(slot.id)).now_or_never();
        assert!(first.is_none());

        for _ in 0..200 {
            if engine.store().booking_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(engine.store().booking_count(), 1);
        assert_eq!(engine.get_slot(&slot.id).unwrap().status, SlotStatus::Occupied);

        let err = engine.create_booking(request(slot.id)).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_consistent(&engine);
    }

    let engine = Engine::open(&path).unwrap();
    assert_eq!(engine.store().booking_count(), 1);
    assert_consistent(&engine);
}

#[tokio::test]
async fn engine_wal_replay() {
    let path = test_wal_path("replay.wal");
    let (slot_id, kept, cancelled) = {
        let engine = Engine::open(&path).unwrap();
        let slot_a = engine.store().provision_slot("A1").await.unwrap();
        let slot_b = engine.store().provision_slot("A2").await.unwrap();
        let kept = engine.create_booking(request(slot_a.id)).await.unwrap();
        let cancelled = engine.create_booking(request(slot_b.id)).await.unwrap();
        engine.cancel_booking(cancelled).await.unwrap();
        (slot_a.id, kept, cancelled)
    };

    let engine = Engine::open(&path).unwrap();
    assert_eq!(engine.store().slot_count(), 2);
    assert_eq!(engine.get_booking(&kept).unwrap().status, BookingStatus::Upcoming);
    assert_eq!(
        engine.get_booking(&cancelled).unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.get_slot(&slot_id).unwrap().status, SlotStatus::Occupied);
    assert_eq!(engine.monitor().get(CREATE_BOOKING).unwrap().count, 2);
    assert_eq!(engine.monitor().get(CANCEL_BOOKING).unwrap().count, 1);
    assert_consistent(&engine);
}

#[tokio::test]
async fn engine_compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let (before_slots, before_bookings, before_monitor) = {
        let engine = Engine::open(&path).unwrap();
        let slot = engine.store().provision_slot("A1").await.unwrap();
        for _ in 0..5 {
            let id = engine.create_booking(request(slot.id)).await.unwrap();
            engine.cancel_booking(id).await.unwrap();
        }
        engine.create_booking(request(slot.id)).await.unwrap();
        assert!(engine.wal_appends_since_compact().await > 10);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new log.
        engine.list_slots().await.unwrap();
        (
            engine.store().slots(),
            engine.store().bookings(),
            engine.monitor().get(CREATE_BOOKING).unwrap(),
        )
    };

    let engine = Engine::open(&path).unwrap();
    assert_eq!(engine.store().slots(), before_slots);
    assert_eq!(engine.store().bookings(), before_bookings);
    assert_eq!(engine.monitor().get(CREATE_BOOKING).unwrap(), before_monitor);
    assert_eq!(engine.monitor().get(LIST_SLOTS).unwrap().count, 1);
    assert_consistent(&engine);
}

#[tokio::test]
async fn compact_in_memory_is_noop() {
    let (engine, _) = engine_with_slots(&["A1"]).await;
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}
