//! Offline queue retry scheduler
//!
//! Idle → (tick or manual request) → Draining → (pass complete) → Idle.
//! A manual request that finds a pass running is rejected; a tick that finds
//! one running is skipped.

use crate::drain_gate::{DrainGate, DrainState};
use crate::offline_queue::{OfflineQueue, RetryReport};
use crate::retry::RetryPolicy;
use crate::task::{shutdown_requested, BackgroundTask};
use chrono::{DateTime, Utc};
use nanoclaw_core::prelude::*;
use nanoclaw_core::{GatewayMetrics, LatencyTimer};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What started a retry pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTrigger {
    Manual,
    Scheduled,
}

impl RetryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Summary of one completed retry pass
#[derive(Debug, Clone, Serialize)]
pub struct RetryRun {
    pub trigger: RetryTrigger,
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub dropped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RetryRun {
    /// Every attempt failed and at least one entry is still queued
    pub fn all_failed(&self) -> bool {
        self.failed > 0 && self.uploaded == 0
    }
}

/// Drives retry passes over the offline queue
pub struct RetryScheduler<U: Uploader> {
    queue: Arc<OfflineQueue>,
    uploader: Arc<U>,
    gate: DrainGate,
    policy: RetryPolicy,
    last_run: RwLock<Option<RetryRun>>,
    metrics: GatewayMetrics,
}

impl<U: Uploader + 'static> RetryScheduler<U> {
    pub fn new(queue: Arc<OfflineQueue>, uploader: Arc<U>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            uploader,
            gate: DrainGate::new("offline_queue"),
            policy,
            last_run: RwLock::new(None),
            metrics: GatewayMetrics::new("retry_scheduler"),
        }
    }

    pub fn state(&self) -> DrainState {
        self.gate.state()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn last_run(&self) -> Option<RetryRun> {
        self.last_run.read().await.clone()
    }

    /// Run a pass now
    ///
    /// Fails with [`GatewayError::DrainInProgress`] if a pass is already running.
    pub async fn drain_now(&self) -> Result<RetryRun> {
        let _permit = self.gate.try_begin()?;
        Ok(self.run_pass(RetryTrigger::Manual).await)
    }

    /// Scheduled pass; `None` when skipped because one is already running
    pub async fn tick(&self) -> Option<RetryRun> {
        match self.gate.try_begin() {
            Ok(_permit) => Some(self.run_pass(RetryTrigger::Scheduled).await),
            Err(_) => {
                debug!("Retry pass already running, skipping tick");
                None
            }
        }
    }

    async fn run_pass(&self, trigger: RetryTrigger) -> RetryRun {
        let started_at = Utc::now();

        let report: RetryReport = self
            .queue
            .retry_all(|batch| {
                let uploader = self.uploader.clone();
                let metrics = &self.metrics;
                async move {
                    let result = {
                        let _timer = LatencyTimer::start(|d| metrics.record_upload_latency(d));
                        uploader.upload(&batch).await
                    };
                    match &result {
                        Ok(()) => metrics.record_uploaded("retry"),
                        Err(e) if e.is_permanent() => metrics.record_dropped(e.kind()),
                        Err(e) => metrics.record_upload_failure(e.kind()),
                    }
                    result
                }
            })
            .await;

        let run = RetryRun {
            trigger,
            attempted: report.attempted,
            uploaded: report.uploaded,
            failed: report.failed,
            dropped: report.dropped,
            started_at,
            finished_at: Utc::now(),
        };

        self.metrics.record_retry_pass(trigger.as_str());
        self.metrics.set_queue_size(self.queue.size().await);
        *self.last_run.write().await = Some(run.clone());
        run
    }

    /// Start the periodic loop
    ///
    /// The delay between passes follows the [`RetryPolicy`]: it grows after a
    /// pass that delivered nothing and resets after any delivery or an empty
    /// queue. Stopping the returned task lets a running pass finish.
    pub fn spawn(self: Arc<Self>) -> BackgroundTask {
        BackgroundTask::spawn("retry_scheduler", move |mut shutdown| async move {
            info!(
                interval = ?self.policy.interval,
                max_backoff = ?self.policy.max_backoff,
                "Retry scheduler started"
            );

            let mut failed_passes: u32 = 0;
            loop {
                let delay = self.policy.delay(failed_passes);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_requested(&mut shutdown) => break,
                }

                if let Some(run) = self.tick().await {
                    if run.all_failed() {
                        failed_passes = failed_passes.saturating_add(1);
                        warn!(
                            failed = run.failed,
                            next_delay = ?self.policy.delay(failed_passes),
                            "Retry pass delivered nothing, backing off"
                        );
                    } else {
                        failed_passes = 0;
                    }
                }
            }

            info!("Retry scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::{MockOutcome, MockUploader};
    use std::time::Duration;

    fn batch(node: &str) -> Arc<Batch> {
        let reading = ReadingInput::new(node, "temperature", 20.0, "C")
            .validate(Utc::now())
            .unwrap();
        Arc::new(Batch::form("gw", vec![reading]).unwrap())
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    async fn setup(uploader: MockUploader, entries: usize) -> (Arc<RetryScheduler<MockUploader>>, Arc<OfflineQueue>, Arc<MockUploader>) {
        let queue = Arc::new(OfflineQueue::new(10, OverflowPolicy::EvictOldest));
        for i in 0..entries {
            queue.enqueue(batch(&format!("n{}", i)), "down").await;
        }
        let uploader = Arc::new(uploader);
        let scheduler = Arc::new(RetryScheduler::new(queue.clone(), uploader.clone(), policy()));
        (scheduler, queue, uploader)
    }

    #[tokio::test]
    async fn test_drain_now_records_last_run() {
        let (scheduler, queue, _) = setup(MockUploader::new(), 2).await;
        assert!(scheduler.last_run().await.is_none());

        let run = scheduler.drain_now().await.unwrap();
        assert_eq!((run.uploaded, run.failed, run.dropped), (2, 0, 0));
        assert_eq!(run.trigger, RetryTrigger::Manual);
        assert_eq!(queue.size().await, 0);

        let last = scheduler.last_run().await.unwrap();
        assert_eq!(last.uploaded, 2);
        assert_eq!(scheduler.state(), DrainState::Idle);
    }

    #[tokio::test]
    async fn test_manual_request_rejected_while_draining() {
        let (uploader, gate) = MockUploader::new().gated();
        let (scheduler, queue, uploader) = setup(uploader, 1).await;

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.drain_now().await })
        };
        uploader.wait_started().await;
        assert_eq!(scheduler.state(), DrainState::Draining);

        let err = scheduler.drain_now().await.unwrap_err();
        assert!(matches!(err, GatewayError::DrainInProgress { .. }));
        assert!(scheduler.tick().await.is_none());

        gate.add_permits(1);
        let run = first.await.unwrap().unwrap();
        assert_eq!(run.uploaded, 1);
        assert_eq!(queue.size().await, 0);
        assert_eq!(uploader.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_pass_drains_queue() {
        let (scheduler, queue, _) = setup(MockUploader::new(), 3).await;
        let task = scheduler.clone().spawn();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.size().await, 0);
        let run = scheduler.last_run().await.unwrap();
        assert_eq!(run.trigger, RetryTrigger::Scheduled);
        assert_eq!(run.uploaded, 3);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_failed_passes() {
        let (scheduler, queue, uploader) = setup(MockUploader::failing(), 1).await;
        let task = scheduler.clone().spawn();

        // passes at 10s, 30s and 70s; the next would be at 130s
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(uploader.attempts(), 3);
        assert_eq!(queue.snapshot().await[0].attempts, 4);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_success() {
        let uploader = MockUploader::scripted([MockOutcome::FailTransient], MockOutcome::Succeed);
        let (scheduler, queue, uploader) = setup(uploader, 1).await;
        let task = scheduler.clone().spawn();

        // fail at 10s, succeed at 30s, then empty passes every 10s
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(uploader.attempts(), 2);
        assert_eq!(queue.size().await, 0);

        queue.enqueue(batch("late"), "down").await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.size().await, 0);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_inflight_pass_finish() {
        let (uploader, gate) = MockUploader::new().gated();
        let (scheduler, queue, uploader) = setup(uploader, 1).await;
        let task = scheduler.clone().spawn();

        uploader.wait_started().await;
        let stopping = tokio::spawn(task.stop());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!stopping.is_finished());

        gate.add_permits(1);
        stopping.await.unwrap();
        assert_eq!(queue.size().await, 0);
        assert_eq!(scheduler.last_run().await.unwrap().uploaded, 1);
    }
}
