//! Configuration types for the NanoClaw gateway
//!
//! Uses the `config` crate for layered configuration from defaults, an
//! optional file and environment variables.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root configuration for the gateway process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identifier stamped on every batch sent upstream
    #[serde(default = "default_gateway_id")]
    pub gateway_id: String,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reading buffer configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Offline queue configuration
    #[serde(default)]
    pub offline_queue: OfflineQueueConfig,

    /// Downstream coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Offline queue retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Automatic flush configuration
    #[serde(default)]
    pub auto_flush: AutoFlushConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_gateway_id() -> String {
    "nanoclaw_gateway_001".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: default_gateway_id(),
            server: ServerConfig::default(),
            buffer: BufferConfig::default(),
            offline_queue: OfflineQueueConfig::default(),
            coordinator: CoordinatorConfig::default(),
            retry: RetryConfig::default(),
            auto_flush: AutoFlushConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// ============================================================================
// Capacity Policy
// ============================================================================

/// What a bounded buffer or queue does when an entry arrives while full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest resident entry to admit the new one
    #[default]
    EvictOldest,
    /// Refuse the new entry and leave the contents unchanged
    Reject,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EvictOldest => write!(f, "evict_oldest"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

// ============================================================================
// Component Configurations
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Reading buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum number of resident readings
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,

    /// Buffer size at which an upload becomes eligible
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Behaviour when a reading arrives on a full buffer
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Number of newest readings shown in status
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_batch_threshold() -> usize {
    100
}

fn default_recent_window() -> usize {
    10
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            batch_threshold: default_batch_threshold(),
            overflow: OverflowPolicy::default(),
            recent_window: default_recent_window(),
        }
    }
}

/// Offline queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueueConfig {
    /// Maximum number of queued batches
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Behaviour when a failed batch arrives on a full queue
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Downstream coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub url: String,

    /// Path batches are posted to
    #[serde(default = "default_ingest_path")]
    pub ingest_path: String,

    /// Optional bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Whole-request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_coordinator_url() -> String {
    "https://moltclaw.clawland.ai".to_string()
}

fn default_ingest_path() -> String {
    "/ingest".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
            ingest_path: default_ingest_path(),
            api_key: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl CoordinatorConfig {
    /// Full URL batches are posted to
    ///
    /// The ingest path is resolved under the base URL's path, so
    /// `https://host/api` with `/ingest` posts to `https://host/api/ingest`.
    pub fn endpoint(&self) -> Result<Url> {
        let mut base = Url::parse(&self.url)
            .map_err(|e| GatewayError::config(format!("invalid coordinator url {:?}: {}", self.url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.ingest_path.trim_start_matches('/')).map_err(|e| {
            GatewayError::config(format!("invalid ingest path {:?}: {}", self.ingest_path, e))
        })
    }
}

/// Offline queue retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Enable the periodic retry task
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay between scheduled retry passes
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub interval: Duration,

    /// Upper bound on the delay after consecutive failed passes
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_true() -> bool {
    true
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_retry_interval(),
            max_backoff: default_max_backoff(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// Automatic flush configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFlushConfig {
    /// Flush when the threshold is hit and on every interval
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Periodic flush interval for a non-empty buffer
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub interval: Duration,
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for AutoFlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_flush_interval(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl GatewayConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables, e.g. NANOCLAW_BUFFER__CAPACITY=5000
        builder = builder.add_source(
            config::Environment::with_prefix("NANOCLAW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.gateway_id.trim().is_empty() {
            return Err(GatewayError::config("gateway_id must not be empty"));
        }
        if self.buffer.capacity == 0 {
            return Err(GatewayError::config("buffer.capacity must be at least 1"));
        }
        if self.buffer.batch_threshold == 0 {
            return Err(GatewayError::config("buffer.batch_threshold must be at least 1"));
        }
        if self.buffer.batch_threshold > self.buffer.capacity {
            return Err(GatewayError::config(format!(
                "buffer.batch_threshold ({}) exceeds buffer.capacity ({})",
                self.buffer.batch_threshold, self.buffer.capacity
            )));
        }
        if self.offline_queue.capacity == 0 {
            return Err(GatewayError::config("offline_queue.capacity must be at least 1"));
        }
        if self.retry.interval.is_zero() {
            return Err(GatewayError::config("retry.interval must be non-zero"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(GatewayError::config("retry.multiplier must be >= 1.0"));
        }
        if self.auto_flush.interval.is_zero() {
            return Err(GatewayError::config("auto_flush.interval must be non-zero"));
        }
        if self.coordinator.request_timeout.is_zero() {
            return Err(GatewayError::config("coordinator.request_timeout must be non-zero"));
        }
        self.coordinator.endpoint()?;
        Ok(())
    }
}
