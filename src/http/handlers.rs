use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;
use crate::monitor::format_ms;

use super::error::ApiError;
use super::AppState;

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub id: SlotId,
    pub number: String,
    pub status: SlotStatus,
}

impl From<Slot> for SlotView {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.id,
            number: slot.label,
            status: slot.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: BookingId,
    pub slot_id: SlotId,
    pub slot_number: String,
    pub vehicle_number: String,
    pub start_time: Ms,
    pub end_time: Ms,
    pub total_cost: f64,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl From<BookingInfo> for BookingView {
    fn from(info: BookingInfo) -> Self {
        let b = info.booking;
        Self {
            id: b.id,
            slot_number: info
                .slot_label
                .unwrap_or_else(|| format!("Slot {}", b.slot_id)),
            slot_id: b.slot_id,
            vehicle_number: b.vehicle_number,
            start_time: b.window.start,
            end_time: b.window.end,
            total_cost: b.total_cost,
            status: b.status,
            created_at: b.created_at,
        }
    }
}

/// Every field is optional so a missing one is reported as a 400, not a
/// deserialization failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    pub slot_id: Option<String>,
    pub vehicle_number: Option<String>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
    pub total_cost: Option<f64>,
}

impl CreateBookingBody {
    fn into_request(self) -> Result<BookingRequest, ApiError> {
        let mut missing = Vec::new();
        if self.slot_id.is_none() {
            missing.push("slotId");
        }
        if self.vehicle_number.as_deref().is_none_or(|v| v.trim().is_empty()) {
            missing.push("vehicleNumber");
        }
        if self.start_time.is_none() {
            missing.push("startTime");
        }
        if self.end_time.is_none() {
            missing.push("endTime");
        }
        if self.total_cost.is_none() {
            missing.push("totalCost");
        }
        let missing_fields =
            || ApiError::BadRequest(format!("Missing required fields: {}", missing.join(", ")));
        if !missing.is_empty() {
            return Err(missing_fields());
        }
        let (Some(slot_id), Some(vehicle_number), Some(start), Some(end), Some(total_cost)) = (
            self.slot_id,
            self.vehicle_number,
            self.start_time,
            self.end_time,
            self.total_cost,
        ) else {
            return Err(missing_fields());
        };

        Ok(BookingRequest {
            slot_id: parse_id("slotId", &slot_id)?,
            vehicle_number,
            window: Window::new(start, end),
            total_cost,
        })
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("Invalid {field}: {raw:?}")))
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: BookingId,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MonitorView {
    pub query_type: String,
    pub operation_label: String,
    pub count: u64,
    pub total_time: String,
    pub avg_time: String,
    pub max_time: String,
    pub last_executed: Ms,
}

impl From<MonitorRecord> for MonitorView {
    fn from(rec: MonitorRecord) -> Self {
        Self {
            query_type: rec.operation_label.clone(),
            operation_label: rec.operation_label,
            count: rec.count,
            total_time: format_ms(rec.total_time),
            avg_time: format_ms(rec.avg_time),
            max_time: format_ms(rec.max_time),
            last_executed: rec.last_executed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub message: &'static str,
    pub slots: usize,
    pub bookings: usize,
}

#[derive(Debug, Serialize)]
pub struct TableView {
    pub name: &'static str,
    pub records: usize,
}

#[derive(Debug, Serialize)]
pub struct StoreStatusView {
    pub message: &'static str,
    pub tables: Vec<TableView>,
    pub wal_appends_since_compact: u64,
}

pub async fn list_slots(State(state): State<AppState>) -> Result<Json<Vec<SlotView>>, ApiError> {
    let slots = state.engine.list_slots().await?;
    Ok(Json(slots.into_iter().map(SlotView::from).collect()))
}

pub async fn list_bookings(
    State(state): State<AppState>,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let bookings = state.engine.list_bookings().await?;
    Ok(Json(bookings.into_iter().map(BookingView::from).collect()))
}

pub async fn create_booking(
    State(state): State<AppState>,
    body: Result<Json<CreateBookingBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let request = body.into_request()?;
    let id = state.engine.create_booking(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id,
            message: "Booking created successfully",
        }),
    ))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let id = parse_id("booking id", &id)?;
    let message = match state.engine.cancel_booking(id).await? {
        CancelOutcome::Cancelled => "Booking cancelled successfully",
        CancelOutcome::AlreadyCancelled => "Booking already cancelled",
    };
    Ok(Json(Message { message }))
}

pub async fn monitor_requests(State(state): State<AppState>) -> Json<Vec<MonitorView>> {
    Json(
        state
            .engine
            .monitor_report()
            .into_iter()
            .map(MonitorView::from)
            .collect(),
    )
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let store = state.engine.store();
    Json(Health {
        message: "Store connection successful",
        slots: store.slot_count(),
        bookings: store.booking_count(),
    })
}

pub async fn store_status(State(state): State<AppState>) -> Json<StoreStatusView> {
    let status = state.engine.store_status().await;
    Json(StoreStatusView {
        message: "Store structure checked successfully",
        tables: status
            .tables
            .into_iter()
            .map(|t| TableView {
                name: t.name,
                records: t.records,
            })
            .collect(),
        wal_appends_since_compact: status.wal_appends_since_compact,
    })
}
