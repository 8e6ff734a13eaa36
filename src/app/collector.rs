//! This module contains the primary entry point for running the collector.
use super::setup::PreparedApp;
use anyhow::{anyhow, Result};
use site_telemetry::logging;
use site_telemetry::storage::{EventStore, SledEventStore};
use site_telemetry::web;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the telemetry collector until Ctrl-C.
///
/// # Errors
///
/// This function will return an error if the store cannot be opened or the
/// server fails to bind.
pub async fn run(prepared: PreparedApp) -> Result<()> {
    logging::init_subscriber(prepared.config.mode, None).map_err(|e| anyhow!(e))?;

    let store = Arc::new(SledEventStore::new(prepared.db)?);
    println!("📥 Collector ready ({} stored events)", store.count().await?);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down collector");
    };

    web::start_server(store, prepared.port, shutdown).await
}
