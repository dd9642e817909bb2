/// Workflow management REST API endpoints
///
/// Registration is idempotent and takes effect immediately: the registry swaps
/// in a new snapshot, so executions already running keep the definition they
/// started with.

use crate::{
    api::{receipt_response, ApiError, AppState},
    queue::EnqueueOptions,
    runtime::{context::TriggerMode, graph},
    workflow::WorkflowDefinition,
};
use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow registration
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Summary row for workflow listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Request body for manual execution
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub mode: Option<TriggerMode>,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(register_workflow).get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow).delete(delete_workflow))
        .route("/api/workflows/{id}/execute", post(execute_workflow))
}

/// Register (or replace) a workflow
///
/// POST /api/workflows
/// Body: { "id": "...", "name": "...", "nodes": [...], "edges": [...], "settings": {...} }
async fn register_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<WorkflowDefinition>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    if workflow.id.is_empty() {
        return Err(ApiError::bad_request("workflow id must not be empty"));
    }
    graph::plan(&workflow).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let response = WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' registered", workflow.name),
    };
    tracing::info!(
        "🔥 Registered workflow: {} ({}) with {} nodes",
        workflow.id,
        workflow.name,
        workflow.nodes.len()
    );
    state.queue.register_workflow(workflow);

    Ok(Json(response))
}

/// List registered workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<WorkflowSummary> = state
        .queue
        .engine()
        .workflows()
        .list()
        .iter()
        .map(|wf| WorkflowSummary {
            id: wf.id.clone(),
            name: wf.name.clone(),
            node_count: wf.nodes.len(),
            edge_count: wf.edges.len(),
        })
        .collect();
    Json(json!({ "workflows": workflows }))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    state
        .queue
        .engine()
        .workflows()
        .get(&id)
        .map(|wf| Json(wf.as_ref().clone()))
        .ok_or_else(|| ApiError::not_found(format!("workflow not found: {}", id)))
}

/// DELETE /api/workflows/{id}
///
/// Schedules pointing at the workflow stay in place and skip their runs.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.queue.engine().workflows().remove(&id) {
        return Err(ApiError::not_found(format!("workflow not found: {}", id)));
    }
    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}

/// Execute a workflow manually
///
/// POST /api/workflows/{id}/execute
/// Body (optional): { "input": {...}, "userId": "...", "mode": "manual" }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Response, ApiError> {
    let request: ExecuteRequest = if body.trim().is_empty() {
        ExecuteRequest::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid execute request for workflow {}: {}", id, e);
            ApiError::bad_request(format!("invalid request body: {}", e))
        })?
    };

    let mut options = EnqueueOptions::new(request.mode.unwrap_or(TriggerMode::Manual));
    options.user_id = request.user_id;

    tracing::info!("🚀 Execution requested for workflow: {} (mode: {})", id, options.mode);
    let receipt = state.queue.enqueue(&id, request.input, options).await?;
    Ok(receipt_response(receipt))
}
