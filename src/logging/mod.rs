//! This module contains the logging infrastructure.
//!
//! It includes the console mirror used in development mode, a `tracing`
//! layer that turns host application events into telemetry records, and
//! subscriber setup for the binary.
pub mod collector;
pub mod console;

pub use collector::TelemetryLayer;

use crate::types::RuntimeMode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix shared by every `tracing` target emitted from this crate.
pub const OWN_TARGET_PREFIX: &str = "site_telemetry";

/// Default filter directive when `RUST_LOG` is not set.
pub fn default_filter(mode: RuntimeMode) -> &'static str {
    match mode {
        RuntimeMode::Development => "info,site_telemetry=debug",
        RuntimeMode::Production => "warn",
    }
}

/// Installs the global subscriber: an `EnvFilter`, human-readable output on
/// stderr, and optionally a layer forwarding events into telemetry.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_subscriber(
    mode: RuntimeMode,
    telemetry_layer: Option<TelemetryLayer>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(mode)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(console_layer)
        .try_init()?;
    Ok(())
}
