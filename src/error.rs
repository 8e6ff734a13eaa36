//! Error types for the telemetry library.
//!
//! None of these escape the record/flush entry points; they are returned by
//! setup code (configuration, session files, storage) and carried inside
//! dropped delivery results.
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to read configuration from {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration from {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Session file error at {path}: {source}")]
    Session {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink rejected batch of {records} records: {message}")]
    Sink { records: usize, message: String },

    #[error("Sink did not answer within {0:?}")]
    SinkTimeout(Duration),

    #[error("Observer '{observer}' is not supported here: {reason}")]
    ObserverUnsupported { observer: String, reason: String },
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
