//! # NanoClaw Gateway
//!
//! Regional aggregation gateway. Edge nodes report readings over HTTP; the
//! gateway buffers them, forms batches and forwards them to the coordinator.
//! Batches that cannot be delivered wait in a bounded offline queue and are
//! retried on a schedule.
//!
//! ## Components
//!
//! - `ReadingBuffer`: bounded, insertion-ordered holding area
//! - `BatchFormer`: turns a drained snapshot into an immutable batch
//! - `HttpUploader`: one POST per batch, no retries of its own
//! - `OfflineQueue`: bounded FIFO of undelivered batches
//! - `RetryScheduler`: periodic and manual retry passes with backoff
//! - `GatewayController`: ties the above together behind the HTTP API

pub mod api;
pub mod batch_former;
pub mod buffer;
pub mod controller;
pub mod drain_gate;
pub mod offline_queue;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod uploader;

pub use batch_former::*;
pub use buffer::*;
pub use controller::*;
pub use drain_gate::*;
pub use offline_queue::*;
pub use retry::*;
pub use scheduler::*;
pub use task::*;
pub use uploader::*;

use nanoclaw_core::prelude::*;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Gateway process: HTTP API plus background workers
pub struct Gateway {
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run until ctrl-c
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop the workers
    ///
    /// Readings still buffered at shutdown are not flushed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;

        let uploader = HttpUploader::new(HttpUploaderConfig::from_coordinator(&self.config.coordinator)?)?;
        info!(
            gateway_id = %self.config.gateway_id,
            coordinator = %uploader.endpoint(),
            uploader = uploader.name(),
            buffer_capacity = self.config.buffer.capacity,
            batch_threshold = self.config.buffer.batch_threshold,
            queue_capacity = self.config.offline_queue.capacity,
            "Starting gateway"
        );

        let listener = tokio::net::TcpListener::bind(&self.config.server.listen)
            .await
            .map_err(|e| {
                GatewayError::config(format!("cannot bind {}: {}", self.config.server.listen, e))
            })?;

        let controller = Arc::new(GatewayController::new(&self.config, uploader));

        let mut workers = Vec::new();
        if self.config.retry.enabled {
            workers.push(controller.spawn_retry());
        }
        if self.config.auto_flush.enabled {
            workers.push(controller.clone().spawn_auto_flush(self.config.auto_flush.interval));
        }

        let served = api::serve(listener, controller.clone(), shutdown).await;

        futures::future::join_all(workers.into_iter().map(BackgroundTask::stop)).await;

        let remaining = controller.buffer_size().await;
        if remaining > 0 {
            warn!(readings = remaining, "Discarding buffered readings at shutdown");
        }
        let queued = controller.queue_size().await;
        if queued > 0 {
            warn!(batches = queued, "Discarding offline queue at shutdown");
        }

        served.map_err(|e| GatewayError::Internal(format!("HTTP server failed: {}", e)))?;
        info!("Gateway stopped");
        Ok(())
    }
}
