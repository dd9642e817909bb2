/// Webhook execution endpoint
///
/// Any HTTP method on /webhook/{workflow_id} starts the workflow with mode
/// `webhook`. The JSON body becomes the execution input; request headers,
/// query parameters and the method are exposed as context variables.

use crate::{
    api::{receipt_response, ApiError, AppState},
    queue::EnqueueOptions,
    runtime::context::TriggerMode,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::Response,
    routing::{any, Router},
};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Create webhook routes
pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{workflow_id}", any(execute_webhook))
}

/// Execute a workflow via webhook trigger
///
/// ANY /webhook/{workflow_id}
/// Body: JSON payload that becomes the execution input (may be empty)
async fn execute_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<Response, ApiError> {
    tracing::info!("📥 Webhook request received: {} {}", method, workflow_id);
    tracing::debug!("📄 Request body: {}", body);

    let input = if body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(&body) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!("❌ Invalid JSON payload for webhook {}: {}", workflow_id, e);
                return Err(ApiError::bad_request(format!("invalid JSON payload: {}", e)));
            }
        }
    };

    let options = EnqueueOptions::new(TriggerMode::Webhook)
        .with_variable("headers", header_map(&headers))
        .with_variable(
            "query",
            Value::Object(query.into_iter().map(|(k, v)| (k, Value::String(v))).collect()),
        )
        .with_variable("method", Value::String(method.to_string()));

    let receipt = state.queue.enqueue(&workflow_id, input, options).await?;
    Ok(receipt_response(receipt))
}

/// Headers as a JSON object; non-UTF-8 values are skipped
fn header_map(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}
