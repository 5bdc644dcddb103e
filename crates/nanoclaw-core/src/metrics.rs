//! Metrics for the NanoClaw gateway
//!
//! Records through the `metrics` facade; whichever recorder the process
//! installs decides where they end up.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Ingest metrics
    pub const READINGS_INGESTED: &str = "nanoclaw_readings_ingested_total";
    pub const READINGS_INVALID: &str = "nanoclaw_readings_invalid_total";
    pub const READINGS_EVICTED: &str = "nanoclaw_readings_evicted_total";
    pub const READINGS_REJECTED: &str = "nanoclaw_readings_rejected_total";
    pub const BUFFER_SIZE: &str = "nanoclaw_buffer_size";

    // Upload metrics
    pub const BATCHES_UPLOADED: &str = "nanoclaw_batches_uploaded_total";
    pub const BATCHES_QUEUED: &str = "nanoclaw_batches_queued_total";
    pub const BATCHES_DROPPED: &str = "nanoclaw_batches_dropped_total";
    pub const UPLOAD_LATENCY: &str = "nanoclaw_upload_latency_seconds";
    pub const UPLOAD_FAILURES: &str = "nanoclaw_upload_failures_total";

    // Offline queue metrics
    pub const QUEUE_SIZE: &str = "nanoclaw_offline_queue_size";
    pub const QUEUE_EVICTIONS: &str = "nanoclaw_offline_queue_evictions_total";
    pub const RETRY_PASSES: &str = "nanoclaw_retry_passes_total";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const TRIGGER: &str = "trigger";
    pub const ERROR_TYPE: &str = "error_type";
    pub const REASON: &str = "reason";
}

/// Gateway metrics
#[derive(Clone)]
pub struct GatewayMetrics {
    component: String,
}

impl GatewayMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record an accepted reading
    pub fn record_ingested(&self) {
        counter!(
            names::READINGS_INGESTED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a reading that failed validation
    pub fn record_invalid(&self) {
        counter!(
            names::READINGS_INVALID,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a reading evicted to make room
    pub fn record_reading_evicted(&self) {
        counter!(
            names::READINGS_EVICTED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a reading refused by a full buffer
    pub fn record_reading_rejected(&self) {
        counter!(
            names::READINGS_REJECTED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Set buffer size
    pub fn set_buffer_size(&self, size: usize) {
        gauge!(
            names::BUFFER_SIZE,
            labels::COMPONENT => self.component.clone(),
        )
        .set(size as f64);
    }

    /// Record a delivered batch
    pub fn record_uploaded(&self, trigger: &str) {
        counter!(
            names::BATCHES_UPLOADED,
            labels::COMPONENT => self.component.clone(),
            labels::TRIGGER => trigger.to_string(),
        )
        .increment(1);
    }

    /// Record a batch handed to the offline queue
    pub fn record_queued(&self) {
        counter!(
            names::BATCHES_QUEUED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a batch that was lost
    pub fn record_dropped(&self, reason: &str) {
        counter!(
            names::BATCHES_DROPPED,
            labels::COMPONENT => self.component.clone(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    /// Record a failed delivery attempt
    pub fn record_upload_failure(&self, error_type: &str) {
        counter!(
            names::UPLOAD_FAILURES,
            labels::COMPONENT => self.component.clone(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(1);
    }

    /// Record upload latency
    pub fn record_upload_latency(&self, duration: Duration) {
        histogram!(
            names::UPLOAD_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Set offline queue size
    pub fn set_queue_size(&self, size: usize) {
        gauge!(
            names::QUEUE_SIZE,
            labels::COMPONENT => self.component.clone(),
        )
        .set(size as f64);
    }

    /// Record a queued batch evicted by a newer one
    pub fn record_queue_eviction(&self) {
        counter!(
            names::QUEUE_EVICTIONS,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a completed retry pass
    pub fn record_retry_pass(&self, trigger: &str) {
        counter!(
            names::RETRY_PASSES,
            labels::COMPONENT => self.component.clone(),
            labels::TRIGGER => trigger.to_string(),
        )
        .increment(1);
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Get elapsed time without stopping
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_records_once() {
        let mut recorded = Vec::new();
        {
            let timer = LatencyTimer::start(|d| recorded.push(d));
            std::thread::sleep(Duration::from_millis(5));
            timer.stop();
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0] >= Duration::from_millis(5));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = GatewayMetrics::new("test");
        metrics.record_ingested();
        metrics.set_queue_size(3);
        metrics.record_upload_latency(Duration::from_millis(12));
    }
}
