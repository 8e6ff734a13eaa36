//! Destinations for flushed batches.
//!
//! A sink receives one call per flush with every row of the batch, in the
//! order the records were buffered. Sinks are write-only.
pub mod http;

pub use http::HttpSink;

use crate::types::SinkRow;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

#[async_trait]
pub trait Sink {
    /// Writes one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch was not accepted. The caller drops the
    /// batch; sinks should not retry internally.
    async fn write_batch(&self, rows: &[SinkRow]) -> Result<()>;
}

/// A `Sink` that keeps every batch in memory.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<SinkRow>>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<SinkRow>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn rows(&self) -> Vec<SinkRow> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_batch(&self, rows: &[SinkRow]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory sink is set to fail");
        }
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rows.to_vec());
        Ok(())
    }
}
