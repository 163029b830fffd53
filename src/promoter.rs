use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::model::now_ms;
use crate::store::TransactionalStore;

/// Background task that moves bookings along `upcoming → active → completed`
/// as their windows start and end.
pub async fn run_promoter<S: TransactionalStore>(engine: Arc<Engine<S>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let advanced = engine.advance_due(now_ms()).await;
        if !advanced.is_empty() {
            debug!("promoter advanced {} bookings", advanced.len());
        }
    }
}

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}
