//! A `Sink` that posts batches to a collector over HTTP.
use super::Sink;
use crate::error::TelemetryError;
use crate::types::SinkRow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

pub const INGEST_PATH: &str = "/api/telemetry";

pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    /// Creates a sink posting to `{endpoint}/api/telemetry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), INGEST_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn write_batch(&self, rows: &[SinkRow]) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(rows)
            .send()
            .await
            .with_context(|| format!("failed to reach collector at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Sink {
                records: rows.len(),
                message: format!("collector answered {}", status),
            }
            .into());
        }
        Ok(())
    }
}
