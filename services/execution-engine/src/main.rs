//! Execution Engine Service
//!
//! Runs the engine against the simulated broker gateway with the background
//! fill, expiry and cleanup tasks until interrupted.

use anyhow::Result;
use execution_engine::{
    Catalog, EngineConfig, ExecutionEngine, HealthStatus, Reconciler, SimulatedBrokerGateway,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "execution-engine";
const HEALTH_CHECK_INTERVAL_SECS: u64 = 10;
const CATALOG_PATH_ENV: &str = "CATALOG_PATH";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Execution Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env()?;
    let catalog = load_catalog()?;
    info!(
        "Catalog loaded: {} brokers, {} venues, {} algorithms",
        catalog.brokers.len(),
        catalog.venues.len(),
        catalog.algorithms.len()
    );

    let gateway = Arc::new(SimulatedBrokerGateway::new(
        config.modify_success_rate,
        config.seed,
    ));
    let engine = Arc::new(ExecutionEngine::new(config, catalog, gateway)?);

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let mut handles = Reconciler::new(Arc::clone(&engine)).spawn(&shutdown_tx);

    let health_engine = Arc::clone(&engine);
    let mut shutdown_rx = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let health = health_engine.health();
                    match health.status {
                        HealthStatus::Healthy => info!(
                            "health check: {} active / {} total orders, {} fills, {} venues open",
                            health.active_orders,
                            health.total_orders,
                            health.metrics.fills_applied,
                            health.open_venues
                        ),
                        HealthStatus::Degraded => warn!(
                            "health check degraded: {}/{} brokers, {}/{} venues active",
                            health.active_brokers, health.brokers,
                            health.active_venues, health.venues
                        ),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Health check task received shutdown signal");
                    break;
                }
            }
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping background tasks");
    let _ = shutdown_tx.send(());

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    info!("Execution Engine shut down successfully");
    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", SERVICE_NAME.replace('-', "_")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();
}

/// Catalog from `CATALOG_PATH`, else the built-in set
fn load_catalog() -> Result<Catalog> {
    match std::env::var(CATALOG_PATH_ENV) {
        Ok(path) => {
            info!("Loading catalog from {}", path);
            Ok(Catalog::load(&path)?)
        }
        Err(_) => Ok(Catalog::builtin()),
    }
}
