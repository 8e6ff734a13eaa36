//! This module defines the storage interface and implementation for telemetry
//! events received by the collector or written by a local sink.
use crate::sink::Sink;
use crate::types::SinkRow;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sled::Db;
use std::collections::BTreeMap;
use tracing::warn;

/// Counts over every stored event.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct EventSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// A trait for storing and querying telemetry events.
#[async_trait]
pub trait EventStore {
    /// Appends a batch of events, keeping their order.
    ///
    /// # Errors
    ///
    /// This function will return an error if the batch cannot be written.
    /// A failed batch is not partially applied.
    async fn append_batch(&self, rows: &[SinkRow]) -> Result<()>;

    /// Retrieves up to `limit` events, newest first.
    ///
    /// # Errors
    ///
    /// This function will return an error if the events cannot be read.
    async fn recent(&self, limit: usize) -> Result<Vec<SinkRow>>;

    /// Counts stored events by severity and category.
    ///
    /// # Errors
    ///
    /// This function will return an error if the events cannot be read.
    async fn summary(&self) -> Result<EventSummary>;

    /// Returns the number of stored events.
    async fn count(&self) -> Result<usize>;
}

/// An `EventStore` implementation using `sled` for storage.
///
/// Keys are ids from `Db::generate_id`, big-endian, so iteration order is
/// insertion order.
pub struct SledEventStore {
    db: Db,
    tree: sled::Tree,
}

impl SledEventStore {
    /// Creates a new `SledEventStore`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the `telemetry_events` tree
    /// cannot be opened.
    pub fn new(db: Db) -> Result<Self> {
        let tree = db.open_tree("telemetry_events")?;
        Ok(Self { db, tree })
    }

    /// Decodes every stored row, newest first. Rows that fail to decode are
    /// skipped.
    fn rows_newest_first(&self) -> impl Iterator<Item = SinkRow> + '_ {
        self.tree.iter().rev().filter_map(|entry| {
            let (key, value) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read telemetry event: {}", e);
                    return None;
                }
            };
            match serde_json::from_slice::<SinkRow>(&value) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!("Skipping corrupt telemetry event {:?}: {}", key, e);
                    None
                }
            }
        })
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn append_batch(&self, rows: &[SinkRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for row in rows {
            let key = self.db.generate_id()?;
            batch.insert(key.to_be_bytes().to_vec(), serde_json::to_vec(row)?);
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SinkRow>> {
        Ok(self.rows_newest_first().take(limit).collect())
    }

    async fn summary(&self) -> Result<EventSummary> {
        let mut summary = EventSummary::default();
        for row in self.rows_newest_first() {
            summary.total += 1;
            *summary
                .by_severity
                .entry(row.severity.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_category
                .entry(row.category.as_str().to_string())
                .or_default() += 1;
        }
        Ok(summary)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}

#[async_trait]
impl Sink for SledEventStore {
    async fn write_batch(&self, rows: &[SinkRow]) -> Result<()> {
        self.append_batch(rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, RecordContext, RecordKind, Severity};

    fn store() -> SledEventStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledEventStore::new(db).unwrap()
    }

    fn row(kind: RecordKind, severity: Severity, message: &str) -> SinkRow {
        let context = RecordContext {
            session_id: "store".to_string(),
            ..RecordContext::default()
        };
        SinkRow::from(&Record::new(kind, severity, message, context))
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = store();
        store
            .append_batch(&[
                row(RecordKind::Log, Severity::Warn, "first"),
                row(RecordKind::Log, Severity::Warn, "second"),
            ])
            .await
            .unwrap();
        store
            .append_batch(&[row(RecordKind::Error, Severity::Error, "third")])
            .await
            .unwrap();

        let recent: Vec<String> = store
            .recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(recent, vec!["third", "second"]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn summary_counts_by_severity_and_category() {
        let store = store();
        store
            .write_batch(&[
                row(RecordKind::Log, Severity::Warn, "slow"),
                row(RecordKind::Error, Severity::Error, "boom"),
                row(RecordKind::Metric, Severity::Error, "lcp = 5000"),
            ])
            .await
            .unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_severity["error"], 2);
        assert_eq!(summary.by_severity["warn"], 1);
        assert_eq!(summary.by_category["metric"], 1);
    }

    #[tokio::test]
    async fn corrupt_entries_are_skipped() {
        let store = store();
        store
            .append_batch(&[row(RecordKind::Log, Severity::Warn, "kept")])
            .await
            .unwrap();
        store.tree.insert(u64::MAX.to_be_bytes(), b"not json".to_vec()).unwrap();

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "kept");
    }
}
