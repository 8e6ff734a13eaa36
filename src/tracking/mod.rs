//! Specialised front ends over the telemetry pipeline: error tracking with
//! deduplication, and performance metrics.
pub mod errors;
pub mod memory;
pub mod performance;

pub use errors::{ErrorSummary, ErrorTracker, TrackedError, DEFAULT_MAX_TRACKED_ERRORS};
pub use memory::MemoryObserver;
pub use performance::{classify_with, MetricSummary, PerformanceMonitor, Thresholds};
