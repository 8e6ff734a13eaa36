//! Performance metrics: classification against two thresholds and
//! recording through the telemetry pipeline.
use crate::config::TelemetryConfig;
use crate::telemetry::Telemetry;
use crate::types::{Metadata, MetricSample, MetricStatus, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

pub const QUERY_DURATION: &str = "query_duration";
pub const RENDER_TIME: &str = "render_time";
pub const MEMORY_USAGE: &str = "memory_usage";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub good: f64,
    pub poor: f64,
}

impl Thresholds {
    pub const fn new(good: f64, poor: f64) -> Self {
        Self { good, poor }
    }

    pub fn classify(&self, value: f64) -> MetricStatus {
        if value <= self.good {
            MetricStatus::Healthy
        } else if value <= self.poor {
            MetricStatus::Warning
        } else {
            MetricStatus::Critical
        }
    }
}

/// Built-in thresholds. Timings in milliseconds, `cls` unitless,
/// `memory_usage` in percent.
pub const DEFAULT_THRESHOLDS: &[(&str, Thresholds)] = &[
    ("lcp", Thresholds::new(2500.0, 4000.0)),
    ("fcp", Thresholds::new(1800.0, 3000.0)),
    ("fid", Thresholds::new(100.0, 300.0)),
    ("inp", Thresholds::new(200.0, 500.0)),
    ("cls", Thresholds::new(0.1, 0.25)),
    ("ttfb", Thresholds::new(800.0, 1800.0)),
    (QUERY_DURATION, Thresholds::new(1000.0, 3000.0)),
    (RENDER_TIME, Thresholds::new(16.0, 50.0)),
    (MEMORY_USAGE, Thresholds::new(70.0, 90.0)),
];

/// Classifies a value. Names without thresholds are healthy.
pub fn classify_with(thresholds: Option<&Thresholds>, value: f64) -> MetricStatus {
    debug_assert!(value.is_finite(), "metric value must be finite, got {}", value);
    match thresholds {
        Some(thresholds) if value.is_finite() => thresholds.classify(value),
        _ => MetricStatus::Healthy,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: u64,
    pub last: f64,
    pub max: f64,
    pub last_status: MetricStatus,
}

pub struct PerformanceMonitor {
    telemetry: Telemetry,
    thresholds: HashMap<String, Thresholds>,
    summaries: Mutex<HashMap<String, MetricSummary>>,
}

impl PerformanceMonitor {
    /// Creates a monitor with the built-in thresholds overlaid by the
    /// config's `metric_thresholds`.
    pub fn new(telemetry: Telemetry, config: &TelemetryConfig) -> Self {
        let mut thresholds: HashMap<String, Thresholds> = DEFAULT_THRESHOLDS
            .iter()
            .map(|(name, t)| (name.to_string(), *t))
            .collect();
        thresholds.extend(
            config
                .metric_thresholds
                .iter()
                .map(|(name, t)| (name.to_lowercase(), *t)),
        );

        Self {
            telemetry,
            thresholds,
            summaries: Mutex::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self, name: &str) -> Option<&Thresholds> {
        self.thresholds.get(&name.to_lowercase())
    }

    pub fn classify(&self, name: &str, value: f64) -> MetricStatus {
        classify_with(self.thresholds(name), value)
    }

    /// Classifies and records a metric. Healthy values are filed at info,
    /// warnings at warn and critical values at error severity.
    pub fn record_metric(&self, name: &str, value: f64, metadata: Option<Metadata>) -> MetricStatus {
        let status = self.classify(name, value);

        {
            let mut summaries = self
                .summaries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let summary = summaries.entry(name.to_lowercase()).or_insert(MetricSummary {
                count: 0,
                last: value,
                max: value,
                last_status: status,
            });
            summary.count += 1;
            summary.last = value;
            summary.max = summary.max.max(value);
            summary.last_status = status;
        }

        let mut record = self.telemetry.build_record(
            RecordKind::Metric,
            status.severity(),
            format!("{} = {}", name, value),
            metadata,
        );
        record.metric = Some(MetricSample {
            name: name.to_string(),
            value,
            status,
        });
        self.telemetry.submit(record, true);

        status
    }

    /// Awaits `future` and records how long it took in milliseconds.
    pub async fn measure<F, T>(&self, name: &str, metadata: Option<Metadata>, future: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let output = future.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record_metric(name, elapsed_ms, metadata);
        output
    }

    /// Summary of a metric. Names match case-insensitively, as thresholds do.
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn summaries(&self) -> HashMap<String, MetricSummary> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
