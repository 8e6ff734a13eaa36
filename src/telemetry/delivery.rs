use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// What caused a batch to be swapped out of the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    Timer,
    Capacity,
    Critical,
    Manual,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::Timer => "timer",
            FlushReason::Capacity => "capacity",
            FlushReason::Critical => "critical",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Outcome of one delivery attempt. Never surfaced as an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Nothing was buffered.
    Empty,
    Delivered { records: usize },
    /// The batch is gone: the sink failed, timed out, or the delivery task
    /// could not take it.
    Dropped { records: usize, reason: String },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryResult::Empty => f.write_str("nothing to flush"),
            DeliveryResult::Delivered { records } => write!(f, "delivered {} records", records),
            DeliveryResult::Dropped { records, reason } => {
                write!(f, "dropped {} records ({})", records, reason)
            }
        }
    }
}

/// Point-in-time counters of a telemetry instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryStats {
    pub buffered: usize,
    pub filtered_records: u64,
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub dropped_batches: u64,
    pub dropped_records: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    filtered_records: AtomicU64,
    delivered_batches: AtomicU64,
    delivered_records: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_records: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_filtered(&self) {
        self.filtered_records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe(&self, result: &DeliveryResult) {
        match result {
            DeliveryResult::Empty => {}
            DeliveryResult::Delivered { records } => {
                self.delivered_batches.fetch_add(1, Ordering::Relaxed);
                self.delivered_records
                    .fetch_add(*records as u64, Ordering::Relaxed);
            }
            DeliveryResult::Dropped { records, .. } => {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                self.dropped_records
                    .fetch_add(*records as u64, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn snapshot(&self, buffered: usize) -> TelemetryStats {
        TelemetryStats {
            buffered,
            filtered_records: self.filtered_records.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            delivered_records: self.delivered_records.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}
