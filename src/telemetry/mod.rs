//! The telemetry pipeline: record construction and filtering, the shared
//! buffer, and hand-off of swapped-out batches to the delivery task.
//!
//! A `Telemetry` value is an explicitly owned instance. Clones share one
//! buffer and one delivery task. Call `destroy()` to stop the timer and
//! flush what is left; dropping every clone does the same without waiting.
pub mod buffer;
pub mod delivery;
pub mod policy;
mod worker;

pub use buffer::RecordBuffer;
pub use delivery::{DeliveryResult, FlushReason, TelemetryStats};
pub use policy::SeverityPolicy;

use crate::config::TelemetryConfig;
use crate::context::AmbientContext;
use crate::logging::console;
use crate::sink::Sink;
use crate::types::{ErrorInfo, Metadata, Record, RecordKind, RuntimeMode, Severity};
use delivery::StatsCounters;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use worker::{FlushWorker, WorkerCommand};

/// State shared between the handles and the delivery task.
pub(crate) struct Shared {
    pub(crate) mode: RuntimeMode,
    pub(crate) buffer: RecordBuffer,
    pub(crate) stats: StatsCounters,
}

struct Inner {
    shared: Arc<Shared>,
    policy: SeverityPolicy,
    ambient: AmbientContext,
    commands: mpsc::Sender<WorkerCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

impl Telemetry {
    /// Builds a telemetry instance and spawns its delivery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &TelemetryConfig,
        ambient: AmbientContext,
        sink: Arc<dyn Sink + Send + Sync>,
    ) -> Self {
        let shared = Arc::new(Shared {
            mode: config.mode,
            buffer: RecordBuffer::new(config.max_buffer_size),
            stats: StatsCounters::default(),
        });

        let (commands_tx, commands_rx) = mpsc::channel(config.max_pending_batches.max(1));
        let worker = FlushWorker::new(
            shared.clone(),
            sink,
            commands_rx,
            config.flush_interval(),
            config.sink_timeout(),
        );
        let handle = tokio::spawn(worker.run());

        debug!(
            "Telemetry started in {} mode (session {})",
            config.mode,
            ambient.session_id()
        );

        Self {
            inner: Arc::new(Inner {
                shared,
                policy: SeverityPolicy::for_mode(config.mode),
                ambient,
                commands: commands_tx,
                worker: Mutex::new(Some(handle)),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn mode(&self) -> RuntimeMode {
        self.inner.shared.mode
    }

    pub fn ambient(&self) -> &AmbientContext {
        &self.inner.ambient
    }

    pub fn set_page_path(&self, path: impl Into<String>) {
        self.inner.ambient.set_page_path(Some(path.into()));
    }

    /// Records one observation.
    ///
    /// Returns `true` if the record was buffered for delivery. `error` is
    /// kept only for error and critical severities. Never blocks on I/O.
    pub fn record(
        &self,
        kind: RecordKind,
        severity: Severity,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        error: Option<ErrorInfo>,
    ) -> bool {
        let mut record = self.build_record(kind, severity, message, metadata);
        if severity.carries_error() {
            record.error = error;
        }
        self.submit(record, true)
    }

    pub fn debug(&self, message: impl Into<String>, metadata: Option<Metadata>) -> bool {
        self.record(RecordKind::Log, Severity::Debug, message, metadata, None)
    }

    pub fn info(&self, message: impl Into<String>, metadata: Option<Metadata>) -> bool {
        self.record(RecordKind::Log, Severity::Info, message, metadata, None)
    }

    pub fn warn(&self, message: impl Into<String>, metadata: Option<Metadata>) -> bool {
        self.record(RecordKind::Log, Severity::Warn, message, metadata, None)
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        error: Option<ErrorInfo>,
    ) -> bool {
        self.record(RecordKind::Log, Severity::Error, message, metadata, error)
    }

    /// Records a critical entry and flushes immediately.
    pub fn critical(
        &self,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        error: Option<ErrorInfo>,
    ) -> bool {
        self.record(RecordKind::Log, Severity::Critical, message, metadata, error)
    }

    pub(crate) fn build_record(
        &self,
        kind: RecordKind,
        severity: Severity,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Record {
        let context = self.inner.ambient.resolve(metadata);
        Record::new(kind, severity, message, context)
    }

    pub(crate) fn mirror(&self, record: &Record) {
        if self.inner.policy.mirror_to_console {
            console::mirror(record);
        }
    }

    /// Applies the mode policy and buffers the record.
    ///
    /// `mirror` is false for records that already reached the console
    /// through `tracing`.
    pub(crate) fn submit(&self, record: Record, mirror: bool) -> bool {
        if mirror {
            self.mirror(&record);
        }

        if !self.inner.policy.buffers(record.severity) {
            self.inner.shared.stats.record_filtered();
            return false;
        }

        if self.inner.destroyed.load(Ordering::SeqCst) {
            return false;
        }

        self.enqueue(record)
    }

    /// Buffers a record that passed filtering.
    ///
    /// If `destroy()` started after the caller's check, the final flush may
    /// already have taken the buffer. The record and anything buffered with
    /// it are then handed off as one more batch, or counted as dropped when
    /// the delivery task is gone.
    fn enqueue(&self, record: Record) -> bool {
        let critical = record.severity == Severity::Critical;
        if let Some(batch) = self.inner.shared.buffer.push(record) {
            self.dispatch(batch, FlushReason::Capacity);
        } else if critical {
            let batch = self.inner.shared.buffer.take();
            self.dispatch(batch, FlushReason::Critical);
        }

        if self.inner.destroyed.load(Ordering::SeqCst) {
            let batch = self.inner.shared.buffer.take();
            self.dispatch(batch, FlushReason::Shutdown);
            return false;
        }
        true
    }

    /// Hands a swapped-out batch to the delivery task without waiting.
    fn dispatch(&self, batch: Vec<Record>, reason: FlushReason) {
        if batch.is_empty() {
            return;
        }

        let command = WorkerCommand::Deliver {
            batch,
            reason,
            done: None,
        };
        if let Err(e) = self.inner.commands.try_send(command) {
            let (command, why) = match e {
                TrySendError::Full(command) => (command, "delivery queue full"),
                TrySendError::Closed(command) => (command, "delivery task stopped"),
            };
            if let WorkerCommand::Deliver { batch, .. } = command {
                let result = DeliveryResult::Dropped {
                    records: batch.len(),
                    reason: why.to_string(),
                };
                self.inner.shared.stats.observe(&result);
                debug!("Telemetry {}", result);
            }
        }
    }

    /// Number of records currently waiting in the buffer.
    pub fn buffered_len(&self) -> usize {
        self.inner.shared.buffer.len()
    }

    pub fn stats(&self) -> TelemetryStats {
        self.inner.shared.stats.snapshot(self.buffered_len())
    }

    /// Delivers everything buffered so far as one batch.
    ///
    /// Records buffered while the write is in flight stay for the next
    /// flush. Never fails; a failed write drops the batch.
    pub async fn flush(&self) -> DeliveryResult {
        let batch = self.inner.shared.buffer.take();
        if batch.is_empty() {
            return DeliveryResult::Empty;
        }

        let records = batch.len();
        let (done_tx, done_rx) = oneshot::channel();
        let command = WorkerCommand::Deliver {
            batch,
            reason: FlushReason::Manual,
            done: Some(done_tx),
        };

        let stopped = DeliveryResult::Dropped {
            records,
            reason: "delivery task stopped".to_string(),
        };
        if self.inner.commands.send(command).await.is_err() {
            self.inner.shared.stats.observe(&stopped);
            return stopped;
        }
        done_rx.await.unwrap_or(stopped)
    }

    /// Stops the flush timer, delivers what is left and waits for the
    /// delivery task to exit. Later calls return `Empty`.
    pub async fn destroy(&self) -> DeliveryResult {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return DeliveryResult::Empty;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let result = if self
            .inner
            .commands
            .send(WorkerCommand::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            done_rx.await.unwrap_or(DeliveryResult::Empty)
        } else {
            DeliveryResult::Empty
        };

        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        debug!("Telemetry destroyed: {}", result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionId;
    use crate::sink::MemorySink;
    use crate::types::SinkRow;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn config(mode: RuntimeMode, max_buffer_size: usize) -> TelemetryConfig {
        TelemetryConfig {
            mode,
            max_buffer_size,
            flush_interval_ms: 3_600_000,
            ..TelemetryConfig::default()
        }
    }

    fn ambient() -> AmbientContext {
        AmbientContext::new(SessionId::from("test-session".to_string()), None)
    }

    fn start(mode: RuntimeMode, max: usize) -> (Telemetry, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let telemetry = Telemetry::start(&config(mode, max), ambient(), sink.clone());
        (telemetry, sink)
    }

    async fn wait_for_batches(sink: &MemorySink, count: usize) {
        for _ in 0..200 {
            if sink.batch_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sink never received {} batches", count);
    }

    /// Sink that parks every write until released.
    struct GatedSink {
        entered: Notify,
        release: Notify,
        inner: MemorySink,
    }

    #[async_trait]
    impl Sink for GatedSink {
        async fn write_batch(&self, rows: &[SinkRow]) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.write_batch(rows).await
        }
    }

    #[tokio::test]
    async fn production_drops_debug_and_info() {
        let (telemetry, sink) = start(RuntimeMode::Production, 100);

        assert!(!telemetry.debug("cache warmed", None));
        assert!(!telemetry.info("page rendered", None));
        assert!(telemetry.warn("slow query", None));
        assert!(telemetry.error("save failed", None, None));
        assert!(telemetry.record(RecordKind::Log, Severity::Critical, "db down", None, None));

        telemetry.flush().await;
        wait_for_batches(&sink, 1).await;

        let severities: Vec<Severity> = sink.rows().iter().map(|r| r.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Warn, Severity::Error, Severity::Critical]
        );
        assert_eq!(telemetry.stats().filtered_records, 2);
    }

    #[tokio::test]
    async fn development_buffers_every_severity() {
        let (telemetry, _sink) = start(RuntimeMode::Development, 100);
        assert!(telemetry.debug("a", None));
        assert!(telemetry.info("b", None));
        assert_eq!(telemetry.buffered_len(), 2);
    }

    #[tokio::test]
    async fn error_info_is_kept_only_for_error_severities() {
        let (telemetry, sink) = start(RuntimeMode::Development, 100);
        let error = ErrorInfo::new("TypeError", "x is undefined");

        telemetry.record(RecordKind::Log, Severity::Warn, "warned", None, Some(error.clone()));
        telemetry.error("failed", None, Some(error));
        telemetry.flush().await;

        let rows = sink.rows();
        assert!(rows[0].error_message.is_none());
        assert_eq!(rows[1].error_message.as_deref(), Some("x is undefined"));
    }

    #[tokio::test]
    async fn reaching_capacity_swaps_the_buffer_immediately() {
        let (telemetry, sink) = start(RuntimeMode::Production, 3);

        telemetry.warn("one", None);
        telemetry.warn("two", None);
        assert_eq!(telemetry.buffered_len(), 2);
        telemetry.warn("three", None);
        assert_eq!(telemetry.buffered_len(), 0);

        telemetry.warn("four", None);
        assert_eq!(telemetry.buffered_len(), 1);

        wait_for_batches(&sink, 1).await;
        assert_eq!(sink.batches()[0].len(), 3);
    }

    #[tokio::test]
    async fn records_during_inflight_flush_stay_buffered() {
        let sink = Arc::new(GatedSink {
            entered: Notify::new(),
            release: Notify::new(),
            inner: MemorySink::new(),
        });
        let telemetry = Telemetry::start(
            &config(RuntimeMode::Production, 100),
            ambient(),
            sink.clone(),
        );

        telemetry.warn("first", None);
        telemetry.warn("second", None);

        let flushing = {
            let telemetry = telemetry.clone();
            tokio::spawn(async move { telemetry.flush().await })
        };
        sink.entered.notified().await;

        telemetry.warn("late", None);
        sink.release.notify_one();

        let result = flushing.await.unwrap();
        assert_eq!(result, DeliveryResult::Delivered { records: 2 });
        assert_eq!(telemetry.buffered_len(), 1);

        let flushed: Vec<String> = sink.inner.rows().into_iter().map(|r| r.action).collect();
        assert_eq!(flushed, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn failed_delivery_is_dropped_not_restored() {
        let (telemetry, sink) = start(RuntimeMode::Production, 100);
        sink.set_failing(true);

        telemetry.warn("lost", None);
        let result = telemetry.flush().await;

        assert!(matches!(result, DeliveryResult::Dropped { records: 1, .. }));
        assert_eq!(telemetry.buffered_len(), 0);
        assert_eq!(telemetry.stats().dropped_records, 1);

        sink.set_failing(false);
        assert_eq!(telemetry.flush().await, DeliveryResult::Empty);
        assert_eq!(sink.batch_count(), 0);
    }

    /// Sink whose writes never complete.
    struct StalledSink;

    #[async_trait]
    impl Sink for StalledSink {
        async fn write_batch(&self, _rows: &[SinkRow]) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn stalled(max_buffer_size: usize, max_pending_batches: usize) -> Telemetry {
        let config = TelemetryConfig {
            mode: RuntimeMode::Production,
            max_buffer_size,
            max_pending_batches,
            sink_timeout_ms: 50,
            flush_interval_ms: 3_600_000,
            ..TelemetryConfig::default()
        };
        Telemetry::start(&config, ambient(), Arc::new(StalledSink))
    }

    async fn wait_for_dropped_batches(telemetry: &Telemetry, count: u64) {
        for _ in 0..200 {
            if telemetry.stats().dropped_batches >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never saw {} dropped batches", count);
    }

    #[tokio::test]
    async fn sink_timeout_drops_the_batch() {
        let telemetry = stalled(100, 16);

        telemetry.warn("never answered", None);
        let result = telemetry.flush().await;

        match result {
            DeliveryResult::Dropped { records, reason } => {
                assert_eq!(records, 1);
                assert!(reason.contains("did not answer"), "{}", reason);
            }
            other => panic!("expected a dropped batch, got {:?}", other),
        }
        assert_eq!(telemetry.buffered_len(), 0);
        assert_eq!(telemetry.stats().dropped_batches, 1);
    }

    #[tokio::test]
    async fn full_delivery_queue_drops_and_counts_batches() {
        let telemetry = stalled(1, 1);

        // The delivery task has not run yet: the first batch fills the
        // queue and the other four are refused.
        for i in 0..5 {
            assert!(telemetry.warn(format!("burst {}", i), None));
        }
        let stats = telemetry.stats();
        assert_eq!(stats.dropped_batches, 4);
        assert_eq!(stats.dropped_records, 4);
        assert_eq!(stats.buffered, 0);

        // The queued batch then times out in the sink.
        wait_for_dropped_batches(&telemetry, 5).await;
        let stats = telemetry.stats();
        assert_eq!(stats.dropped_records, 5);
        assert_eq!(stats.delivered_batches, 0);
    }

    #[tokio::test]
    async fn record_racing_destroy_is_counted_not_lost() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);
        let late = telemetry.build_record(RecordKind::Log, Severity::Warn, "late", None);

        assert_eq!(telemetry.destroy().await, DeliveryResult::Empty);
        // The record passed the destroyed check just before shutdown began.
        assert!(!telemetry.enqueue(late));

        assert_eq!(telemetry.buffered_len(), 0);
        assert_eq!(telemetry.stats().dropped_records, 1);
        assert_eq!(sink.batch_count(), 0);
    }

    #[tokio::test]
    async fn only_development_mirrors_to_console() {
        use crate::logging::console::capture::ConsoleCapture;
        use tracing_subscriber::layer::SubscriberExt;

        let capture = ConsoleCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let (development, _dev_sink) = start(RuntimeMode::Development, 100);
        let (production, _prod_sink) = start(RuntimeMode::Production, 100);

        tracing::subscriber::with_default(subscriber, || {
            development.debug("cache warmed", None);
            production.warn("slow query", None);
            production.error("save failed", None, None);
        });

        assert_eq!(capture.messages(), vec!["cache warmed"]);
        assert_eq!(production.buffered_len(), 2);
    }

    #[tokio::test]
    async fn critical_flushes_before_the_timer() {
        let (telemetry, sink) = start(RuntimeMode::Production, 100);

        telemetry.warn("context", None);
        telemetry.critical("payment provider unreachable", None, None);
        assert_eq!(telemetry.buffered_len(), 0);

        wait_for_batches(&sink, 1).await;
        assert_eq!(sink.batches()[0].len(), 2);
    }

    #[tokio::test]
    async fn three_warnings_flush_as_one_ordered_batch() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);

        telemetry.warn("alpha", None);
        telemetry.warn("beta", None);
        telemetry.warn("gamma", None);
        assert_eq!(telemetry.buffered_len(), 3);

        let result = telemetry.flush().await;
        assert_eq!(result, DeliveryResult::Delivered { records: 3 });
        assert_eq!(telemetry.buffered_len(), 0);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let actions: Vec<&str> = batches[0].iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_a_noop() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);
        assert_eq!(telemetry.flush().await, DeliveryResult::Empty);
        assert_eq!(sink.batch_count(), 0);
    }

    #[tokio::test]
    async fn timer_flushes_non_empty_buffer() {
        let sink = Arc::new(MemorySink::new());
        let config = TelemetryConfig {
            mode: RuntimeMode::Production,
            flush_interval_ms: 20,
            ..TelemetryConfig::default()
        };
        let telemetry = Telemetry::start(&config, ambient(), sink.clone());

        telemetry.warn("periodic", None);
        wait_for_batches(&sink, 1).await;
        assert_eq!(telemetry.buffered_len(), 0);
    }

    #[tokio::test]
    async fn destroy_performs_final_flush_once() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);

        telemetry.warn("last words", None);
        let result = telemetry.destroy().await;
        assert_eq!(result, DeliveryResult::Delivered { records: 1 });
        assert_eq!(sink.batch_count(), 1);

        assert_eq!(telemetry.destroy().await, DeliveryResult::Empty);
        assert!(!telemetry.warn("after shutdown", None));
    }

    #[tokio::test]
    async fn dropping_all_handles_flushes_remaining_records() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);
        telemetry.warn("orphaned", None);
        drop(telemetry);

        wait_for_batches(&sink, 1).await;
        assert_eq!(sink.rows()[0].action, "orphaned");
    }

    #[tokio::test]
    async fn ambient_page_path_is_attached() {
        let (telemetry, sink) = start(RuntimeMode::Production, 50);
        telemetry.set_page_path("/admin/analytics");
        telemetry.warn("chart failed", Some(Metadata::new().component("RevenueChart")));
        telemetry.flush().await;

        let row = &sink.rows()[0];
        assert_eq!(row.resource_path.as_deref(), Some("/admin/analytics"));
        assert_eq!(row.session_id, "test-session");
        assert_eq!(row.details["context"]["component"], "RevenueChart");
    }
}
