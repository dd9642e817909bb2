/// Job and queue management endpoints
///
/// All of these need the durable backend; in direct mode they answer 503.

use crate::{
    api::{ApiError, AppState},
    queue::{JobStatus, QueueStats},
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Request body for cleanup
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub older_than_secs: u64,
}

/// Create job and queue routes
pub fn create_job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/api/jobs/{id}/retry", post(retry_job))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/queue/pause", post(pause_queue))
        .route("/api/queue/resume", post(resume_queue))
        .route("/api/queue/cleanup", post(cleanup_queue))
}

/// GET /api/jobs/{id}
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.queue.get_job_status(&id).await?))
}

/// POST /api/jobs/{id}/retry (failed jobs only)
async fn retry_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.queue.retry(&id).await?;
    Ok(Json(json!({ "message": format!("Job '{}' requeued", id) })))
}

/// DELETE /api/jobs/{id} (waiting or delayed jobs only)
async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.queue.cancel(&id).await?;
    Ok(Json(json!({ "message": format!("Job '{}' cancelled", id) })))
}

/// GET /api/queue/stats
async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.get_stats().await?))
}

/// POST /api/queue/pause
async fn pause_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.queue.pause().await?;
    Ok(Json(json!({ "paused": true })))
}

/// POST /api/queue/resume
async fn resume_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.queue.resume().await?;
    Ok(Json(json!({ "paused": false })))
}

/// POST /api/queue/cleanup
/// Body: { "olderThanSecs": 3600 }
async fn cleanup_queue(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<Value>, ApiError> {
    let removed = state
        .queue
        .cleanup(Duration::from_secs(request.older_than_secs))
        .await?;
    Ok(Json(json!({ "removed": removed })))
}
