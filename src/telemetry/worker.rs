//! The delivery task.
//!
//! Owns every sink call, the flush interval and shutdown. Batches arrive
//! already swapped out of the buffer and are written one at a time.
use super::delivery::{DeliveryResult, FlushReason};
use super::Shared;
use crate::error::TelemetryError;
use crate::sink::Sink;
use crate::types::{Record, SinkRow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

pub(crate) enum WorkerCommand {
    Deliver {
        batch: Vec<Record>,
        reason: FlushReason,
        done: Option<oneshot::Sender<DeliveryResult>>,
    },
    Shutdown {
        done: oneshot::Sender<DeliveryResult>,
    },
}

pub(crate) struct FlushWorker {
    shared: Arc<Shared>,
    sink: Arc<dyn Sink + Send + Sync>,
    commands: mpsc::Receiver<WorkerCommand>,
    flush_interval: Duration,
    sink_timeout: Duration,
}

impl FlushWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        sink: Arc<dyn Sink + Send + Sync>,
        commands: mpsc::Receiver<WorkerCommand>,
        flush_interval: Duration,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            sink,
            commands,
            flush_interval,
            sink_timeout,
        }
    }

    /// Runs until `Shutdown` is received or every command sender is gone.
    pub(crate) async fn run(mut self) {
        let mut timer = interval(self.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // Skip the first immediate tick.

        debug!("Telemetry delivery task started, interval {:?}", self.flush_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let batch = self.shared.buffer.take();
                    if !batch.is_empty() {
                        self.deliver(batch, FlushReason::Timer).await;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Deliver { batch, reason, done }) => {
                        let result = self.deliver(batch, reason).await;
                        if let Some(done) = done {
                            let _ = done.send(result);
                        }
                    }
                    Some(WorkerCommand::Shutdown { done }) => {
                        let result = self.drain().await;
                        let _ = done.send(result);
                        break;
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                }
            }
        }

        debug!("Telemetry delivery task stopped");
    }

    /// Delivers batches still queued, then whatever is left in the buffer.
    async fn drain(&mut self) -> DeliveryResult {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                WorkerCommand::Deliver { batch, reason, done } => {
                    let result = self.deliver(batch, reason).await;
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                }
                WorkerCommand::Shutdown { done } => {
                    let _ = done.send(DeliveryResult::Empty);
                }
            }
        }

        let remaining = self.shared.buffer.take();
        self.deliver(remaining, FlushReason::Shutdown).await
    }

    async fn deliver(&self, batch: Vec<Record>, reason: FlushReason) -> DeliveryResult {
        if batch.is_empty() {
            return DeliveryResult::Empty;
        }

        let rows: Vec<SinkRow> = batch.iter().map(SinkRow::from).collect();
        let records = rows.len();
        trace!("Flushing {} records ({})", records, reason);

        let result = match tokio::time::timeout(self.sink_timeout, self.sink.write_batch(&rows)).await
        {
            Ok(Ok(())) => DeliveryResult::Delivered { records },
            Ok(Err(e)) => DeliveryResult::Dropped {
                records,
                reason: format!("{:#}", e),
            },
            Err(_) => DeliveryResult::Dropped {
                records,
                reason: TelemetryError::SinkTimeout(self.sink_timeout).to_string(),
            },
        };

        self.shared.stats.observe(&result);

        match &result {
            DeliveryResult::Dropped { records, reason: why } => {
                if self.shared.mode.is_development() {
                    warn!("Telemetry batch of {} records dropped ({}): {}", records, reason, why);
                } else {
                    debug!("Telemetry batch of {} records dropped ({}): {}", records, reason, why);
                }
            }
            DeliveryResult::Delivered { records } => {
                trace!("Telemetry batch of {} records delivered ({})", records, reason);
            }
            DeliveryResult::Empty => {}
        }

        result
    }
}
