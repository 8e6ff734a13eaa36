//! Periodic memory-pressure sampling.
//!
//! Only Linux exposes the numbers this needs (`/proc/meminfo`). Elsewhere
//! starting the observer fails and the caller skips it.
use super::performance::{PerformanceMonitor, MEMORY_USAGE};
use crate::error::{Result, TelemetryError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Percentage of physical memory in use, from `/proc/meminfo` contents.
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<f64>().ok()),
            Some("MemAvailable:") => {
                available = parts.next().and_then(|v| v.parse::<f64>().ok())
            }
            _ => {}
        }
    }

    match (total, available) {
        (Some(total), Some(available)) if total > 0.0 => {
            Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
        }
        _ => None,
    }
}

pub fn sample_memory_usage() -> Result<f64> {
    let unsupported = |reason: String| TelemetryError::ObserverUnsupported {
        observer: MEMORY_USAGE.to_string(),
        reason,
    };

    let content = std::fs::read_to_string(MEMINFO_PATH)
        .map_err(|e| unsupported(format!("cannot read {}: {}", MEMINFO_PATH, e)))?;
    parse_meminfo(&content).ok_or_else(|| unsupported(format!("unexpected {} format", MEMINFO_PATH)))
}

pub struct MemoryObserver;

impl MemoryObserver {
    /// Takes one sample, then keeps sampling every `every`.
    ///
    /// # Errors
    ///
    /// Returns `ObserverUnsupported` if the first sample cannot be taken.
    pub fn start(monitor: Arc<PerformanceMonitor>, every: Duration) -> Result<JoinHandle<()>> {
        let first = sample_memory_usage()?;
        monitor.record_metric(MEMORY_USAGE, first, None);

        Ok(tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.tick().await; // Skip the first immediate tick.
            loop {
                timer.tick().await;
                match sample_memory_usage() {
                    Ok(usage) => {
                        monitor.record_metric(MEMORY_USAGE, usage, None);
                    }
                    Err(e) => trace!("Memory sample skipped: {}", e),
                }
            }
        }))
    }
}
