use ulid::Ulid;

use crate::model::{BookingId, BookingStatus};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or missing input, reported before any store access.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    /// A row was not in the state the operation required at commit time.
    #[error("{operation}: conflict: {reason}")]
    Conflict {
        operation: &'static str,
        reason: &'static str,
    },
    #[error("{operation}: booking {booking} is {status}")]
    InvalidState {
        operation: &'static str,
        booking: BookingId,
        status: BookingStatus,
    },
    /// The store failed inside the scope; nothing was committed.
    #[error("{operation}: transaction failed: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    pub(crate) fn slot_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "slot", id }
    }

    pub(crate) fn booking_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "booking", id }
    }

    /// Map a store failure raised inside `operation`'s scope.
    pub(crate) fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition { id, from, .. } => EngineError::InvalidState {
                operation,
                booking: id,
                status: from,
            },
            source => EngineError::Transaction { operation, source },
        }
    }
}

/// `map_err` adapter for store calls inside a scope.
pub(crate) fn in_scope(operation: &'static str) -> impl Fn(StoreError) -> EngineError {
    move |err| EngineError::from_store(operation, err)
}
