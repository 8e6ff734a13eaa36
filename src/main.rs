//! The main entry point for the site-telemetry application.
mod app;

use anyhow::Result;

/// The main function of the application.
///
/// Runs either the telemetry collector (`--serve`) or the interactive
/// console that records telemetry into a local store or a remote collector.
///
/// # Errors
///
/// Returns an error if setup fails or the selected mode exits with an
/// error.
#[tokio::main]
async fn main() -> Result<()> {
    app::launch().await
}
