use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "parkd_operations_total";

/// Histogram: engine operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "parkd_operation_duration_seconds";

/// Counter: transactional scopes discarded without commit. Labels: operation.
pub const TRANSACTIONS_ROLLED_BACK_TOTAL: &str = "parkd_transactions_rolled_back_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: slots currently occupied.
pub const SLOTS_OCCUPIED: &str = "parkd_slots_occupied";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short outcome label for metrics.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::Validation(_)) => "invalid",
        Err(EngineError::NotFound { .. }) => "not_found",
        Err(EngineError::Conflict { .. }) => "conflict",
        Err(EngineError::InvalidState { .. }) => "invalid_state",
        Err(EngineError::Transaction { .. }) => "transaction_failed",
    }
}
