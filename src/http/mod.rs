//! REST surface over the reservation engine.
//!
//! Every route is served both at the root and under `/api`.

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/slots", get(handlers::list_slots))
        .route(
            "/bookings",
            get(handlers::list_bookings).post(handlers::create_booking),
        )
        .route("/bookings/{id}/cancel", put(handlers::cancel_booking))
        .route("/monitor/requests", get(handlers::monitor_requests))
        .route("/health", get(handlers::health))
        .route("/store/status", get(handlers::store_status))
}

/// Requests running past `timeout` are answered with 408.
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// Build the router with tracing and a per-request timeout.
pub fn router(engine: Arc<Engine>, request_timeout: Duration) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .with_state(AppState { engine })
        .layer(timeout_layer(request_timeout))
        .layer(TraceLayer::new_for_http())
}
