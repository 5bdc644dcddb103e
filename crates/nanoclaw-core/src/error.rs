//! Error types for the NanoClaw gateway
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.
//! Every variant falls into one of four classes: validation (rejected at
//! ingest), transient delivery (queued for retry), permanent delivery (dropped)
//! and local conditions such as backpressure or configuration problems.

use std::fmt;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Primary error type for all gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed reading rejected before entering the buffer
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Coordinator unreachable or connection dropped
    #[error("Coordinator error: {message}")]
    Coordinator {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Coordinator answered with a non-success status
    #[error("Coordinator rejected batch with status {status}: {body}")]
    CoordinatorStatus { status: u16, body: String },

    /// Batch could not be serialized; never retried
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Attempt to form a batch from no readings
    #[error("Cannot form a batch from an empty reading sequence")]
    EmptyBatch,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Buffer or queue refused an entry under the reject policy
    #[error("Backpressure: {message}")]
    Backpressure { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// A drain of the same resource is already running
    #[error("Drain already in progress: {resource}")]
    DrainInProgress { resource: &'static str },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a coordinator error
    pub fn coordinator(message: impl Into<String>) -> Self {
        Self::Coordinator {
            message: message.into(),
            source: None,
        }
    }

    /// Create a coordinator error with source
    pub fn coordinator_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Coordinator {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a backpressure error
    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::Backpressure {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if a failed delivery should be kept for another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Coordinator { .. } | Self::CoordinatorStatus { .. } | Self::Timeout { .. }
        )
    }

    /// Check if a failed delivery can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Serialization { .. } | Self::EmptyBatch)
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Coordinator { .. } => "coordinator",
            Self::CoordinatorStatus { .. } => "coordinator_status",
            Self::Serialization { .. } => "serialization",
            Self::EmptyBatch => "empty_batch",
            Self::Configuration { .. } => "configuration",
            Self::Backpressure { .. } => "backpressure",
            Self::Timeout { .. } => "timeout",
            Self::DrainInProgress { .. } => "drain_in_progress",
            Self::Internal(_) => "internal",
        }
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub node_id: Option<String>,
    pub batch_id: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref node) = self.node_id {
            write!(f, " node={}", node)?;
        }
        if let Some(ref batch) = self.batch_id {
            write!(f, " batch={}", batch)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            tracing::warn!(
                error = %e,
                kind = e.kind(),
                component = ctx.component,
                operation = %ctx.operation,
                node_id = ?ctx.node_id,
                batch_id = ?ctx.batch_id,
                "Operation failed"
            );
            e
        })
    }
}
