/// HTTP API Layer
///
/// This module provides the REST API endpoints for the runtime. It handles:
/// - Workflow registration and manual execution
/// - Webhook-triggered execution
/// - Job status and queue management
/// - Cron schedule management

// Workflow registration and execution endpoints
pub mod workflows;

// Webhook execution endpoint
pub mod webhooks;

// Job and queue management endpoints
pub mod jobs;

// Cron schedule endpoints
pub mod schedules;

use crate::{
    queue::{EnqueueReceipt, JobQueue, QueueError},
    runtime::scheduler::{Scheduler, SchedulerError},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;
use std::sync::Arc;

pub use jobs::create_job_routes;
pub use schedules::create_schedule_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Job queue (owns the execution engine and workflow registry)
    pub queue: JobQueue,
    /// Cron scheduler service
    pub scheduler: Arc<Scheduler>,
}

/// All API routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .merge(create_job_routes())
        .merge(create_schedule_routes())
}

/// Error response: status code plus `{ "error": message }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::WorkflowNotFound(_) | QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::InvalidState { .. } => StatusCode::CONFLICT,
            QueueError::Backend(_) | QueueError::Payload(_) => {
                tracing::error!("❌ Queue backend failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Queue(queue_err) => queue_err.into(),
            SchedulerError::InvalidCronExpression(_) | SchedulerError::InvalidTimezone(_) => {
                Self::bad_request(err.to_string())
            }
            SchedulerError::WorkflowNotFound(_) | SchedulerError::JobNotFound(_) => Self::not_found(err.to_string()),
            SchedulerError::Timer(_) => {
                tracing::error!("❌ Scheduler timer failure: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

/// Response for an accepted execution request
///
/// Durable mode answers 202 with the ids to poll; direct mode answers 200
/// with the finished execution.
pub(crate) fn receipt_response(receipt: EnqueueReceipt) -> Response {
    match receipt {
        EnqueueReceipt::Queued { execution_id, job_id } => (
            StatusCode::ACCEPTED,
            Json(json!({ "executionId": execution_id, "jobId": job_id })),
        )
            .into_response(),
        EnqueueReceipt::Completed(result) => {
            let mut body = json!({
                "executionId": result.execution_id,
                "status": result.status,
                "results": result.results,
            });
            match (&result.output, &result.error) {
                (_, Some(error)) => body["error"] = json!(error),
                (Some(output), None) => body["output"] = output.clone(),
                (None, None) => {}
            }
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}
