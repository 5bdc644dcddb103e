//! Upload strategies for the coordinator
//!
//! - `HttpUploader`: posts each batch as JSON to the coordinator
//! - `MockUploader`: scripted outcomes, records what it was given (for testing)

use async_trait::async_trait;
use nanoclaw_core::prelude::*;
use nanoclaw_core::CoordinatorConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, trace};
use url::Url;

/// Longest coordinator error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP uploader configuration
#[derive(Debug, Clone)]
pub struct HttpUploaderConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpUploaderConfig {
    pub fn from_coordinator(config: &CoordinatorConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.endpoint()?,
            api_key: config.api_key.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        })
    }
}

/// Delivers batches to the coordinator over HTTP
///
/// One POST per call, bounded by the connect and request timeouts. Any 2xx
/// is success; everything else is a transient failure except a batch that
/// cannot be serialized, which is permanent.
pub struct HttpUploader {
    client: Client,
    config: HttpUploaderConfig,
}

impl HttpUploader {
    pub fn new(config: HttpUploaderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::coordinator_with_source("Failed to create client", e))?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    fn classify(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::timeout(
                format!("upload to {}", self.config.endpoint),
                self.config.request_timeout.as_millis() as u64,
            )
        } else if error.is_connect() {
            GatewayError::coordinator_with_source("Coordinator unreachable", error)
        } else {
            GatewayError::coordinator_with_source("Upload request failed", error)
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, batch: &Batch) -> Result<()> {
        let body = batch
            .to_json()
            .map_err(|e| GatewayError::serialization_with_source("Failed to serialize batch", e))?;

        let mut request = self
            .client
            .post(self.config.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if status.is_success() {
            debug!(
                batch_id = %batch.batch_id(),
                readings = batch.len(),
                status = status.as_u16(),
                "Batch accepted by coordinator"
            );
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(GatewayError::CoordinatorStatus {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http_uploader"
    }
}

// ============================================================================
// Mock Uploader
// ============================================================================

/// Outcome a [`MockUploader`] produces for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    /// Fails like an unreachable coordinator
    FailTransient,
    /// Fails like a batch that cannot be serialized
    FailPermanent,
}

/// Mock uploader for testing
///
/// Plays back a script of outcomes, then repeats a fallback outcome. Every
/// batch that succeeds is recorded.
pub struct MockUploader {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    uploaded: Mutex<Vec<Batch>>,
    attempts: AtomicUsize,
    started: Notify,
    gate: Option<Arc<Semaphore>>,
}

impl MockUploader {
    /// Uploader that always succeeds
    pub fn new() -> Self {
        Self::scripted([], MockOutcome::Succeed)
    }

    /// Uploader that always fails transiently
    pub fn failing() -> Self {
        Self::scripted([], MockOutcome::FailTransient)
    }

    /// Play `script` in order, then keep answering `fallback`
    pub fn scripted(script: impl IntoIterator<Item = MockOutcome>, fallback: MockOutcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            uploaded: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            started: Notify::new(),
            gate: None,
        }
    }

    /// Hold every call until a permit is added to the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Wait until some call has started
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Batches accepted so far, in call order
    pub async fn uploaded(&self) -> Vec<Batch> {
        self.uploaded.lock().await.clone()
    }

    /// Total number of calls
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(&self, batch: &Batch) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(ref gate) = self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| GatewayError::Internal("mock gate closed".to_string()))?;
            permit.forget();
        }

        let outcome = self.script.lock().await.pop_front().unwrap_or(self.fallback);
        trace!(batch_id = %batch.batch_id(), ?outcome, "Mock upload");

        match outcome {
            MockOutcome::Succeed => {
                self.uploaded.lock().await.push(batch.clone());
                Ok(())
            }
            MockOutcome::FailTransient => Err(GatewayError::coordinator("mock coordinator unreachable")),
            MockOutcome::FailPermanent => Err(GatewayError::Serialization {
                message: "mock malformed batch".to_string(),
                source: None,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock_uploader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use std::net::SocketAddr;

    fn batch(n: usize) -> Batch {
        let now = Utc::now();
        let readings = (0..n)
            .map(|i| {
                ReadingInput::new(format!("node-{}", i), "temperature", i as f64, "C")
                    .validate(now)
                    .unwrap()
            })
            .collect();
        Batch::form("gw-test", readings).unwrap()
    }

    #[derive(Clone, Default)]
    struct Coordinator {
        received: Arc<Mutex<Vec<serde_json::Value>>>,
        auth: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn ingest(
        State(state): State<Coordinator>,
        headers: axum::http::HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        state.auth.lock().await.push(auth);
        state.received.lock().await.push(body);
        StatusCode::ACCEPTED
    }

    async fn spawn_coordinator(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn uploader_for(addr: SocketAddr, api_key: Option<&str>, timeout: Duration) -> HttpUploader {
        HttpUploader::new(HttpUploaderConfig {
            endpoint: Url::parse(&format!("http://{}/ingest", addr)).unwrap(),
            api_key: api_key.map(str::to_string),
            connect_timeout: Duration::from_secs(1),
            request_timeout: timeout,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_upload_success() {
        let coordinator = Coordinator::default();
        let app = Router::new()
            .route("/ingest", post(ingest))
            .with_state(coordinator.clone());
        let addr = spawn_coordinator(app).await;

        let uploader = uploader_for(addr, Some("secret"), Duration::from_secs(5));
        let batch = batch(3);
        uploader.upload(&batch).await.unwrap();

        let received = coordinator.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["gateway_id"], "gw-test");
        assert_eq!(received[0]["batch_id"], batch.batch_id().to_string());
        assert_eq!(received[0]["readings"].as_array().unwrap().len(), 3);
        assert_eq!(
            coordinator.auth.lock().await[0].as_deref(),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn test_http_upload_non_success_status_is_retryable() {
        let app = Router::new().route(
            "/ingest",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "coordinator overloaded") }),
        );
        let addr = spawn_coordinator(app).await;

        let uploader = uploader_for(addr, None, Duration::from_secs(5));
        let err = uploader.upload(&batch(1)).await.unwrap_err();

        match &err {
            GatewayError::CoordinatorStatus { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "coordinator overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_upload_timeout_is_retryable() {
        let app = Router::new().route(
            "/ingest",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let addr = spawn_coordinator(app).await;

        let uploader = uploader_for(addr, None, Duration::from_millis(100));
        let err = uploader.upload(&batch(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_upload_unreachable_is_retryable() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let uploader = uploader_for(addr, None, Duration::from_secs(2));
        let err = uploader.upload(&batch(1)).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_mock_script_then_fallback() {
        let uploader = MockUploader::scripted(
            [MockOutcome::FailTransient, MockOutcome::FailPermanent],
            MockOutcome::Succeed,
        );
        let b = batch(2);

        assert!(uploader.upload(&b).await.unwrap_err().is_retryable());
        assert!(uploader.upload(&b).await.unwrap_err().is_permanent());
        uploader.upload(&b).await.unwrap();
        uploader.upload(&b).await.unwrap();

        assert_eq!(uploader.attempts(), 4);
        assert_eq!(uploader.uploaded().await.len(), 2);
    }
}
