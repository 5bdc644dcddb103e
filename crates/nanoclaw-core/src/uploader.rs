//! Upload strategy for the NanoClaw gateway
//!
//! The gateway never talks to the coordinator directly; it goes through an
//! [`Uploader`] so the transport can be swapped at compile time (HTTP in
//! production, scripted mocks in tests).
//!
//! ## Contract
//!
//! - **One attempt**: `upload` performs exactly one delivery attempt and never
//!   retries on its own. Retrying is the offline queue's job.
//! - **Read-only**: the batch is borrowed immutably.
//! - **Classified failures**: a batch that can never be delivered must fail
//!   with an error for which [`GatewayError::is_permanent`] holds; anything
//!   else is queued for another attempt.
//!
//! [`GatewayError::is_permanent`]: crate::error::GatewayError::is_permanent

use crate::error::Result;
use crate::reading::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers one batch to the downstream coordinator
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Attempt a single delivery of `batch`
    async fn upload(&self, batch: &Batch) -> Result<()>;

    /// Component name for logs and health reporting
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<U: Uploader + ?Sized> Uploader for Arc<U> {
    async fn upload(&self, batch: &Batch) -> Result<()> {
        (**self).upload(batch).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
