use crate::model::Ms;

/// Max bytes in a vehicle identifier.
pub const MAX_VEHICLE_LEN: usize = 32;

/// Max bytes in a slot label.
pub const MAX_SLOT_LABEL_LEN: usize = 32;

/// Max provisioned slots.
pub const MAX_SLOTS: usize = 10_000;

/// Max distinct operation labels tracked by the monitor.
pub const MAX_MONITOR_LABELS: usize = 64;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not cover more than 366 days.
pub const MAX_BOOKING_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
