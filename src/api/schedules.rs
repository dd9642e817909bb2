/// Cron schedule endpoints

use crate::{
    api::{ApiError, AppState},
    runtime::scheduler::{ScheduledJob, Scheduler},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for creating a schedule
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub workflow_id: String,
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Request body for validating an expression
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCronRequest {
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Create schedule routes
pub fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/schedules", post(create_schedule).get(list_schedules))
        .route("/api/schedules/validate", post(validate_cron))
        .route("/api/schedules/{id}", axum::routing::delete(remove_schedule))
        .route("/api/schedules/{id}/stop", post(stop_schedule))
        .route("/api/schedules/{id}/resume", post(resume_schedule))
}

/// POST /api/schedules
/// Body: { "workflowId": "...", "cronExpression": "0 9 * * MON-FRI", "timezone": "Europe/Berlin" }
async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduledJob>), ApiError> {
    let job = state
        .scheduler
        .schedule(&request.workflow_id, &request.cron_expression, request.timezone.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/schedules
async fn list_schedules(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "schedules": state.scheduler.list().await }))
}

/// POST /api/schedules/{id}/stop
async fn stop_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledJob>, ApiError> {
    Ok(Json(state.scheduler.stop(&id).await?))
}

/// POST /api/schedules/{id}/resume
async fn resume_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledJob>, ApiError> {
    Ok(Json(state.scheduler.resume(&id).await?))
}

/// DELETE /api/schedules/{id}
async fn remove_schedule(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.scheduler.remove(&id).await?;
    Ok(Json(json!({ "message": format!("Schedule '{}' removed", id) })))
}

/// POST /api/schedules/validate
///
/// Always 200: `{ "valid": true, "nextRunAt": ... }` or `{ "valid": false, "error": ... }`
async fn validate_cron(Json(request): Json<ValidateCronRequest>) -> Json<Value> {
    let tz = match request.timezone.as_deref() {
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => return Json(json!({ "valid": false, "error": format!("invalid timezone: '{}'", name) })),
        },
        None => Tz::UTC,
    };

    match Scheduler::validate_cron(&request.cron_expression) {
        Ok(schedule) => Json(json!({
            "valid": true,
            "nextRunAt": schedule.next_after(Utc::now(), tz),
        })),
        Err(e) => Json(json!({ "valid": false, "error": e.to_string() })),
    }
}
