//! Gateway controller
//!
//! Owns the buffer, offline queue and retry scheduler and wires the three
//! flush triggers (threshold reached, interval elapsed, manual request) to a
//! single serialized flush path.

use crate::batch_former::BatchFormer;
use crate::buffer::ReadingBuffer;
use crate::drain_gate::DrainGate;
use crate::offline_queue::{OfflineQueue, OfflineQueueEntry, QueueAdmission};
use crate::retry::RetryPolicy;
use crate::scheduler::{RetryRun, RetryScheduler};
use crate::task::{shutdown_requested, BackgroundTask};
use chrono::{DateTime, Utc};
use nanoclaw_core::prelude::*;
use nanoclaw_core::{ErrorContext, ErrorContextExt, GatewayMetrics, LatencyTimer};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Acknowledgement returned to the reporting node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub node_id: String,
    pub buffer_size: usize,
    pub evicted: bool,
}

/// What started a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Manual,
    Threshold,
    Interval,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Threshold => "threshold",
            Self::Interval => "interval",
        }
    }
}

/// Result of one flush
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Coordinator accepted the batch
    Uploaded {
        batch_id: Uuid,
        batch_size: usize,
        timestamp: DateTime<Utc>,
    },
    /// Transient failure; the batch is in the offline queue
    Queued {
        batch_id: Uuid,
        batch_size: usize,
        timestamp: DateTime<Utc>,
        reason: String,
    },
    /// Permanent failure or offline queue refused the batch
    Dropped {
        batch_id: Uuid,
        batch_size: usize,
        timestamp: DateTime<Utc>,
        reason: String,
    },
    /// Nothing was buffered
    Empty,
}

impl FlushOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Uploaded { .. } => "uploaded",
            Self::Queued { .. } => "queued",
            Self::Dropped { .. } => "dropped",
            Self::Empty => "empty",
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Self::Uploaded { batch_size, .. }
            | Self::Queued { batch_size, .. }
            | Self::Dropped { batch_size, .. } => *batch_size,
            Self::Empty => 0,
        }
    }
}

/// Point-in-time view of the gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub gateway_id: String,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub batch_threshold: usize,
    pub should_upload: bool,
    pub buffer_overflow: OverflowPolicy,
    pub offline_queue_size: usize,
    pub offline_queue_capacity: usize,
    pub offline_queue_overflow: OverflowPolicy,
    pub readings_evicted: u64,
    pub readings_rejected: u64,
    /// Deliveries from flushes and retry passes combined
    pub batches_uploaded: u64,
    pub batches_queued: u64,
    pub batches_dropped: u64,
    pub queue_evicted: u64,
    pub queue_rejected: u64,
    pub queue_dropped: u64,
    pub last_retry: Option<RetryRun>,
    pub recent_readings: Vec<Reading>,
}

/// Coordinates ingestion, flushing and offline retry
pub struct GatewayController<U: Uploader> {
    buffer: ReadingBuffer,
    former: BatchFormer,
    uploader: Arc<U>,
    queue: Arc<OfflineQueue>,
    scheduler: Arc<RetryScheduler<U>>,
    flush_gate: DrainGate,
    flush_signal: Notify,
    recent_window: usize,
    metrics: GatewayMetrics,
    uploaded: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl<U: Uploader + 'static> GatewayController<U> {
    pub fn new(config: &GatewayConfig, uploader: U) -> Self {
        Self::with_shared_uploader(config, Arc::new(uploader))
    }

    pub fn with_shared_uploader(config: &GatewayConfig, uploader: Arc<U>) -> Self {
        let queue = Arc::new(OfflineQueue::new(
            config.offline_queue.capacity,
            config.offline_queue.overflow,
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            queue.clone(),
            uploader.clone(),
            RetryPolicy::from_config(&config.retry),
        ));

        Self {
            buffer: ReadingBuffer::new(
                config.buffer.capacity,
                config.buffer.batch_threshold,
                config.buffer.overflow,
            ),
            former: BatchFormer::new(config.gateway_id.clone()),
            uploader,
            queue,
            scheduler,
            flush_gate: DrainGate::new("reading_buffer"),
            flush_signal: Notify::new(),
            recent_window: config.buffer.recent_window,
            metrics: GatewayMetrics::new("controller"),
            uploaded: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn gateway_id(&self) -> &str {
        self.former.gateway_id()
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler<U>> {
        &self.scheduler
    }

    /// Validate and buffer one reading
    ///
    /// Signals the auto-flush worker once the batch threshold is reached but
    /// never waits on it.
    pub async fn ingest(&self, input: ReadingInput) -> Result<IngestReceipt> {
        let reading = input.validate(Utc::now()).inspect_err(|e| {
            self.metrics.record_invalid();
            debug!(error = %e, "Rejected invalid reading");
        })?;
        let node_id = reading.node_id().to_string();

        let admission = match self.buffer.enqueue(reading).await {
            Ok(admission) => admission,
            Err(e) => {
                self.metrics.record_reading_rejected();
                return Err(e);
            }
        };

        self.metrics.record_ingested();
        if admission.evicted {
            self.metrics.record_reading_evicted();
        }
        self.metrics.set_buffer_size(admission.size);

        if admission.size >= self.buffer.batch_threshold() {
            self.flush_signal.notify_one();
        }

        Ok(IngestReceipt {
            node_id,
            buffer_size: admission.size,
            evicted: admission.evicted,
        })
    }

    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        self.flush(FlushTrigger::Manual).await
    }

    /// Drain the buffer into one batch and try to deliver it
    ///
    /// Flushes are serialized; a second caller waits and then drains whatever
    /// arrived meanwhile. A transient delivery failure is not an error: the
    /// batch goes to the offline queue and the outcome says so.
    pub async fn flush(&self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        let _permit = self.flush_gate.begin().await;

        let readings = self.buffer.drain_all().await;
        self.metrics.set_buffer_size(self.buffer.size().await);
        if readings.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let batch = self.former.form(readings).with_context(ErrorContext {
            component: "controller",
            operation: format!("flush:{}", trigger.as_str()),
            node_id: None,
            batch_id: None,
        })?;
        let batch = Arc::new(batch);
        let batch_id = batch.batch_id();
        let batch_size = batch.len();
        let timestamp = batch.timestamp();

        let result = {
            let _timer = LatencyTimer::start(|d| self.metrics.record_upload_latency(d));
            self.uploader.upload(&batch).await
        };

        let outcome = match result {
            Ok(()) => {
                self.uploaded.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_uploaded(trigger.as_str());
                info!(%batch_id, batch_size, trigger = trigger.as_str(), "Batch uploaded");
                FlushOutcome::Uploaded {
                    batch_id,
                    batch_size,
                    timestamp,
                }
            }
            Err(e) if e.is_permanent() => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped(e.kind());
                error!(%batch_id, batch_size, error = %e, "Batch cannot be delivered, dropping");
                FlushOutcome::Dropped {
                    batch_id,
                    batch_size,
                    timestamp,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                self.metrics.record_upload_failure(e.kind());
                let reason = e.to_string();

                match self.queue.enqueue(batch, reason.clone()).await {
                    QueueAdmission::Queued { id, evicted } => {
                        self.queued.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_queued();
                        if evicted.is_some() {
                            self.metrics.record_queue_eviction();
                        }
                        warn!(%batch_id, batch_size, entry_id = id, error = %e, "Upload failed, batch queued for retry");
                        FlushOutcome::Queued {
                            batch_id,
                            batch_size,
                            timestamp,
                            reason,
                        }
                    }
                    QueueAdmission::Rejected => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_dropped("queue_full");
                        error!(%batch_id, batch_size, error = %e, "Upload failed and offline queue is full, dropping batch");
                        FlushOutcome::Dropped {
                            batch_id,
                            batch_size,
                            timestamp,
                            reason: format!("offline queue full after upload failure: {}", reason),
                        }
                    }
                }
            }
        };

        self.metrics.set_queue_size(self.queue.size().await);
        Ok(outcome)
    }

    /// Retry the offline queue now; rejected while a pass is running
    pub async fn retry_queue_now(&self) -> Result<RetryRun> {
        self.scheduler.drain_now().await
    }

    pub async fn list_queue(&self) -> Vec<OfflineQueueEntry> {
        self.queue.snapshot().await
    }

    pub async fn buffer_size(&self) -> usize {
        self.buffer.size().await
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.size().await
    }

    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            gateway_id: self.gateway_id().to_string(),
            buffer_size: self.buffer.size().await,
            buffer_capacity: self.buffer.capacity(),
            batch_threshold: self.buffer.batch_threshold(),
            should_upload: self.buffer.should_upload().await,
            buffer_overflow: self.buffer.overflow(),
            offline_queue_size: self.queue.size().await,
            offline_queue_capacity: self.queue.capacity(),
            offline_queue_overflow: self.queue.overflow(),
            readings_evicted: self.buffer.evicted_count(),
            readings_rejected: self.buffer.rejected_count(),
            batches_uploaded: self.uploaded.load(Ordering::Relaxed) + self.queue.delivered_count(),
            batches_queued: self.queued.load(Ordering::Relaxed),
            batches_dropped: self.dropped.load(Ordering::Relaxed),
            queue_evicted: self.queue.evicted_count(),
            queue_rejected: self.queue.rejected_count(),
            queue_dropped: self.queue.dropped_count(),
            last_retry: self.scheduler.last_run().await,
            recent_readings: self.buffer.recent(self.recent_window).await,
        }
    }

    /// Start the periodic offline queue retry loop
    pub fn spawn_retry(&self) -> BackgroundTask {
        self.scheduler.clone().spawn()
    }

    /// Start the auto-flush worker
    ///
    /// Flushes when `ingest` signals the threshold and every `interval` while
    /// the buffer holds readings.
    pub fn spawn_auto_flush(self: Arc<Self>, interval: Duration) -> BackgroundTask {
        BackgroundTask::spawn("auto_flush", move |mut shutdown| async move {
            info!(?interval, "Auto-flush worker started");

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let trigger = tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = self.flush_signal.notified() => FlushTrigger::Threshold,
                    _ = ticker.tick() => FlushTrigger::Interval,
                };

                if trigger == FlushTrigger::Threshold && !self.buffer.should_upload().await {
                    continue;
                }

                match self.flush(trigger).await {
                    Ok(FlushOutcome::Empty) => {}
                    Ok(outcome) => debug!(
                        trigger = trigger.as_str(),
                        status = outcome.status(),
                        batch_size = outcome.batch_size(),
                        "Auto-flush finished"
                    ),
                    Err(e) => error!(trigger = trigger.as_str(), error = %e, "Auto-flush failed"),
                }
            }

            info!("Auto-flush worker stopped");
        })
    }
}
