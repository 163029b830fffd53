use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::engine::EngineError;

/// Error body is always `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => match err {
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::Conflict { .. } | EngineError::InvalidState { .. } => {
                    StatusCode::CONFLICT
                }
                EngineError::Transaction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Engine(EngineError::NotFound { entity: "slot", .. }) => {
                "Slot not found".to_string()
            }
            ApiError::Engine(EngineError::NotFound { entity: "booking", .. }) => {
                "Booking not found".to_string()
            }
            ApiError::Engine(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!("{status}: {message}");
        } else {
            tracing::debug!("{status}: {message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
