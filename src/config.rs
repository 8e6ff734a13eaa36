//! Telemetry configuration.
//!
//! Every value has a default; a JSON file and `SITE_TELEMETRY_*` environment
//! variables can override them at startup. The runtime mode cannot change
//! once a `Telemetry` instance is built from the config.
use crate::error::{Result, TelemetryError};
use crate::tracking::Thresholds;
use crate::types::RuntimeMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const MODE_ENV: &str = "SITE_TELEMETRY_MODE";
pub const FLUSH_INTERVAL_ENV: &str = "SITE_TELEMETRY_FLUSH_INTERVAL_MS";
pub const MAX_BUFFER_ENV: &str = "SITE_TELEMETRY_MAX_BUFFER";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TelemetryConfig {
    pub mode: RuntimeMode,
    pub flush_interval_ms: u64,
    /// Buffer length at which the contents are swapped out for delivery.
    pub max_buffer_size: usize,
    /// Batches that may wait for the delivery task before new ones are dropped.
    pub max_pending_batches: usize,
    pub sink_timeout_ms: u64,
    pub user_agent: Option<String>,
    /// Per-metric overrides of the built-in thresholds.
    pub metric_thresholds: HashMap<String, Thresholds>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::from_build(),
            flush_interval_ms: 5_000,
            max_buffer_size: 50,
            max_pending_batches: 16,
            sink_timeout_ms: 10_000,
            user_agent: Some(concat!("site-telemetry/", env!("CARGO_PKG_VERSION")).to_string()),
            metric_thresholds: HashMap::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    /// Loads a JSON config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TelemetryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&content).map_err(|source| TelemetryError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `SITE_TELEMETRY_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(MODE_ENV) {
            self.mode = mode
                .parse()
                .map_err(|message| TelemetryError::InvalidConfig {
                    key: MODE_ENV.to_string(),
                    message,
                })?;
        }
        if let Some(interval) = lookup(FLUSH_INTERVAL_ENV) {
            self.flush_interval_ms = parse_number(FLUSH_INTERVAL_ENV, &interval)?;
        }
        if let Some(max) = lookup(MAX_BUFFER_ENV) {
            self.max_buffer_size = parse_number(MAX_BUFFER_ENV, &max)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(invalid("max_buffer_size", "must be at least 1"));
        }
        if self.flush_interval_ms == 0 {
            return Err(invalid("flush_interval_ms", "must be greater than zero"));
        }
        if self.max_pending_batches == 0 {
            return Err(invalid("max_pending_batches", "must be at least 1"));
        }
        for (name, thresholds) in &self.metric_thresholds {
            if !(thresholds.good <= thresholds.poor) {
                return Err(invalid(
                    &format!("metric_thresholds.{}", name),
                    "good must not exceed poor",
                ));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("'{}' is not a number", raw)))
}

fn invalid(key: &str, message: &str) -> TelemetryError {
    TelemetryError::InvalidConfig {
        key: key.to_string(),
        message: message.to_string(),
    }
}
