//! Client-side telemetry for a content site: buffered logs, deduplicated
//! error tracking and classified performance metrics, delivered in batches
//! to a pluggable sink.
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod sink;
pub mod storage;
pub mod telemetry;
pub mod tracking;
pub mod types;
pub mod web;

pub use config::TelemetryConfig;
pub use context::{AmbientContext, SessionId};
pub use error::{Result, TelemetryError};
pub use telemetry::{DeliveryResult, FlushReason, Telemetry, TelemetryStats};
pub use tracking::{ErrorTracker, MemoryObserver, PerformanceMonitor};
pub use types::{ErrorInfo, Metadata, MetricStatus, RecordKind, RuntimeMode, Severity};
