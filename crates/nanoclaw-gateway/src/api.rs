//! HTTP API for edge nodes and operators

use crate::controller::{FlushOutcome, GatewayController};
use crate::offline_queue::OfflineQueueEntry;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use nanoclaw_core::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

/// Error body returned by every failing endpoint
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Backpressure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DrainInProgress { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    agent: &'static str,
    version: &'static str,
    buffer_size: usize,
    offline_queue_size: usize,
}

#[derive(Serialize)]
struct ReportResponse {
    status: &'static str,
    node_id: String,
    buffer_size: usize,
}

#[derive(Serialize)]
struct QueueEntryView {
    id: u64,
    batch_id: Uuid,
    gateway_id: String,
    reading_count: usize,
    timestamp: DateTime<Utc>,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
    last_error: Option<String>,
}

impl From<&OfflineQueueEntry> for QueueEntryView {
    fn from(entry: &OfflineQueueEntry) -> Self {
        Self {
            id: entry.id,
            batch_id: entry.batch.batch_id(),
            gateway_id: entry.batch.gateway_id().to_string(),
            reading_count: entry.batch.len(),
            timestamp: entry.batch.timestamp(),
            enqueued_at: entry.enqueued_at,
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
        }
    }
}

#[derive(Serialize)]
struct QueueResponse {
    queue_size: usize,
    batches: Vec<QueueEntryView>,
}

type SharedController<U> = Arc<GatewayController<U>>;

async fn health<U: Uploader + 'static>(State(gw): State<SharedController<U>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        agent: "nanoclaw",
        version: env!("CARGO_PKG_VERSION"),
        buffer_size: gw.buffer_size().await,
        offline_queue_size: gw.queue_size().await,
    })
}

async fn report<U: Uploader + 'static>(
    State(gw): State<SharedController<U>>,
    payload: std::result::Result<Json<ReadingInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReportResponse>)> {
    let Json(input) = payload?;
    let receipt = gw.ingest(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ReportResponse {
            status: "accepted",
            node_id: receipt.node_id,
            buffer_size: receipt.buffer_size,
        }),
    ))
}

async fn buffer<U: Uploader + 'static>(State(gw): State<SharedController<U>>) -> Response {
    Json(gw.status().await).into_response()
}

async fn batch<U: Uploader + 'static>(State(gw): State<SharedController<U>>) -> ApiResult<Response> {
    let outcome = gw.flush_now().await?;

    let response = match outcome {
        FlushOutcome::Uploaded {
            batch_id,
            batch_size,
            timestamp,
        } => (
            StatusCode::OK,
            Json(json!({
                "status": "uploaded",
                "batch_id": batch_id,
                "batch_size": batch_size,
                "timestamp": timestamp,
            })),
        ),
        FlushOutcome::Queued {
            batch_id,
            batch_size,
            timestamp,
            reason,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "queued",
                "batch_id": batch_id,
                "batch_size": batch_size,
                "timestamp": timestamp,
                "reason": reason,
            })),
        ),
        FlushOutcome::Dropped {
            batch_id,
            batch_size,
            timestamp,
            reason,
        } => (
            StatusCode::OK,
            Json(json!({
                "status": "dropped",
                "batch_id": batch_id,
                "batch_size": batch_size,
                "timestamp": timestamp,
                "reason": reason,
            })),
        ),
        FlushOutcome::Empty => (
            StatusCode::OK,
            Json(json!({ "status": "empty", "batch_size": 0 })),
        ),
    };

    Ok(response.into_response())
}

async fn offline_queue<U: Uploader + 'static>(State(gw): State<SharedController<U>>) -> Json<QueueResponse> {
    let entries = gw.list_queue().await;
    Json(QueueResponse {
        queue_size: entries.len(),
        batches: entries.iter().map(QueueEntryView::from).collect(),
    })
}

async fn retry_queue<U: Uploader + 'static>(State(gw): State<SharedController<U>>) -> ApiResult<Response> {
    match gw.retry_queue_now().await {
        Ok(run) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "completed",
                "uploaded": run.uploaded,
                "failed": run.failed,
                "dropped": run.dropped,
            })),
        )
            .into_response()),
        Err(GatewayError::DrainInProgress { .. }) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "status": "in_progress" })),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

/// Build the gateway router
pub fn router<U: Uploader + 'static>(controller: SharedController<U>) -> Router {
    Router::new()
        .route("/healthz", get(health::<U>))
        .route("/report", post(report::<U>))
        .route("/buffer", get(buffer::<U>))
        .route("/batch", post(batch::<U>))
        .route("/offline-queue", get(offline_queue::<U>))
        .route("/offline-queue/retry", post(retry_queue::<U>))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<U, F>(
    listener: tokio::net::TcpListener,
    controller: SharedController<U>,
    shutdown: F,
) -> std::io::Result<()>
where
    U: Uploader + 'static,
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await
}
