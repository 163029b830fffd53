use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use parkd::config::Config;
use parkd::engine::Engine;
use parkd::promoter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    parkd::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::open(&config.wal_path())?);
    for label in &config.slots {
        if let Err(e) = engine.store().provision_slot(label).await {
            warn!("cannot provision slot {label:?}: {e}");
        }
    }

    tokio::spawn(promoter::run_promoter(
        engine.clone(),
        config.promote_interval,
    ));
    tokio::spawn(promoter::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("parkd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  slots: {}", engine.store().slot_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let app = parkd::http::router(engine, config.request_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("parkd stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
