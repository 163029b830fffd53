use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.end <= window.start {
        return Err(EngineError::Validation(
            "end time must be after start time".into(),
        ));
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range".into()));
    }
    if window.duration_ms() > MAX_BOOKING_WINDOW_MS {
        return Err(EngineError::Validation("booking window too long".into()));
    }
    Ok(())
}

/// Check a booking request and normalize its vehicle number.
pub(crate) fn validate_booking(request: BookingRequest) -> Result<BookingRequest, EngineError> {
    let vehicle_number = request.vehicle_number.trim();
    if vehicle_number.is_empty() {
        return Err(EngineError::Validation("vehicle number is required".into()));
    }
    if vehicle_number.len() > MAX_VEHICLE_LEN {
        return Err(EngineError::Validation(format!(
            "vehicle number longer than {MAX_VEHICLE_LEN} bytes"
        )));
    }
    validate_window(&request.window)?;
    if !request.total_cost.is_finite() || request.total_cost < 0.0 {
        return Err(EngineError::Validation(
            "total cost must be a non-negative number".into(),
        ));
    }
    Ok(BookingRequest {
        vehicle_number: vehicle_number.to_string(),
        ..request
    })
}
