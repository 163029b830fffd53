use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type SlotId = Ulid;
pub type BookingId = Ulid;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Half-open booking window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Occupied,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Occupied => "occupied",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Upcoming => "upcoming",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// A live booking holds its slot.
    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Upcoming | BookingStatus::Active)
    }

    /// Legal moves: `upcoming → active → completed` and `upcoming → cancelled`.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Upcoming, BookingStatus::Active)
                | (BookingStatus::Upcoming, BookingStatus::Cancelled)
                | (BookingStatus::Active, BookingStatus::Completed)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub label: String,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub slot_id: SlotId,
    pub vehicle_number: String,
    pub window: Window,
    pub total_cost: f64,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// Input to `create_booking`, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub slot_id: SlotId,
    pub vehicle_number: String,
    pub window: Window,
    pub total_cost: f64,
}

/// What `cancel_booking` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
}

/// Aggregated latency statistics for one operation label. Times are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub operation_label: String,
    pub count: u64,
    pub total_time: f64,
    pub avg_time: f64,
    pub max_time: f64,
    pub last_executed: Ms,
}

impl MonitorRecord {
    pub fn first(label: &str, elapsed_secs: f64, at: Ms) -> Self {
        Self {
            operation_label: label.to_string(),
            count: 1,
            total_time: elapsed_secs,
            avg_time: elapsed_secs,
            max_time: elapsed_secs,
            last_executed: at,
        }
    }

    pub fn observe(&mut self, elapsed_secs: f64, at: Ms) {
        self.count += 1;
        self.total_time += elapsed_secs;
        self.avg_time = self.total_time / self.count as f64;
        self.max_time = self.max_time.max(elapsed_secs);
        self.last_executed = self.last_executed.max(at);
    }
}

/// One row change inside a committed scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    BookingInserted(Booking),
    BookingStatusSet { id: BookingId, status: BookingStatus },
    SlotStatusSet { id: SlotId, status: SlotStatus },
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SlotProvisioned {
        id: SlotId,
        label: String,
    },
    /// Every mutation of one transactional scope, persisted as a single record.
    Committed {
        mutations: Vec<Mutation>,
    },
    OperationObserved {
        label: String,
        elapsed_secs: f64,
        at: Ms,
    },
    /// Written by compaction in place of the observations it folds.
    MonitorRestored(MonitorRecord),
}

// ── Query result types ───────────────────────────────────────────

/// A booking joined with the label of the slot it claims.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingInfo {
    pub booking: Booking,
    pub slot_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: &'static str,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub tables: Vec<TableInfo>,
    pub wal_appends_since_compact: u64,
}
