//! This module handles the initial setup of the application.
use super::args::AppArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use site_telemetry::{SessionId, TelemetryConfig};
use std::net::TcpListener;
use std::path::PathBuf;

/// Contains all the necessary components for the application to run.
///
/// This struct is created by the `prepare` function and passed to the
/// appropriate `run` function (either for the collector or the console).
pub struct PreparedApp {
    /// The command-line arguments.
    pub args: AppArgs,
    /// The resolved telemetry configuration.
    pub config: TelemetryConfig,
    /// The port for the collector.
    pub port: u16,
    /// The session id shared by every record of this run.
    pub session_id: SessionId,
    /// The database instance.
    pub db: sled::Db,
}

/// Prepares the application for running.
///
/// This function performs the following steps:
/// 1. Loads the config file, if any, and applies environment overrides.
/// 2. Applies `--mode`, which wins over the environment.
/// 3. Finds a free port if not specified.
/// 4. Creates the data directory.
/// 5. Begins a new session id, recorded in the data directory.
/// 6. Opens the database.
/// 7. Prints a start banner.
///
/// # Errors
///
/// This function will return an error if any of the setup steps fail.
pub fn prepare(args: AppArgs) -> Result<PreparedApp> {
    let mut config = match args.config {
        Some(ref path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    }
    .apply_env()?;
    if let Some(mode) = args.mode {
        config = config.with_mode(mode);
    }
    config.validate()?;

    let port = match args.port {
        Some(port) => port,
        None => find_free_port()?,
    };

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory '{}'", args.data_dir))?;

    let data_dir = PathBuf::from(&args.data_dir);
    let session_id = SessionId::begin(data_dir.join("session_id"))?;

    let db = sled::open(data_dir.join("db"))?;

    print_start_banner(&args, &config, port, &session_id);

    Ok(PreparedApp {
        args,
        config,
        port,
        session_id,
        db,
    })
}

/// Prints a banner with startup information.
fn print_start_banner(args: &AppArgs, config: &TelemetryConfig, port: u16, session_id: &SessionId) {
    println!("{}", "📈 Starting site telemetry".bold());
    println!(
        "Mode: {}",
        if args.serve {
            "Collector".to_string()
        } else {
            format!("Console ({})", config.mode)
        }
    );
    if args.serve {
        println!("Collector: http://127.0.0.1:{}", port);
    } else {
        match args.endpoint {
            Some(ref endpoint) => println!("Delivering to: {}", endpoint),
            None => println!("Delivering to: local store"),
        }
        println!("Session: {}", session_id);
        println!(
            "Flush every {} ms or at {} records",
            config.flush_interval_ms, config.max_buffer_size
        );
    }
    println!("Data directory: {}", args.data_dir);
    println!();
}

/// Finds a free TCP port on the local machine.
fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
