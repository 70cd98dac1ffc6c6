//! Task management routes under `/api/scheduler`.
//!
//! Handlers call only the public scheduler surface and translate
//! [`SchedulerError`] codes into HTTP statuses.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use cadence_scheduler::SchedulerError;

use crate::app::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Debug, Deserialize)]
pub struct CronParams {
    pub id: String,
    pub cron: String,
}

#[derive(Debug, Deserialize)]
pub struct PeriodParams {
    pub id: String,
    #[serde(rename = "periodMillis")]
    pub period_millis: i64,
}

fn error_response(e: SchedulerError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        SchedulerError::InvalidExpression { .. } | SchedulerError::InvalidPeriod { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::AlreadyExists { .. } => StatusCode::CONFLICT,
        SchedulerError::NotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(json!({"error": e.to_string(), "code": e.code()})),
    )
}

fn scheduled(state: &AppState, id: &str, message: String) -> Json<Value> {
    let next_fire_at = state
        .scheduler
        .describe(id)
        .and_then(|task| task.next_fire_at);
    Json(json!({
        "id": id,
        "message": message,
        "next_fire_at": next_fire_at,
    }))
}

/// POST /api/scheduler/cron?id=&cron=
pub async fn schedule_cron(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CronParams>,
) -> ApiResult {
    state
        .scheduler
        .register_cron(&params.id, &params.cron)
        .map_err(error_response)?;
    Ok(scheduled(
        &state,
        &params.id,
        format!("Scheduled cron task {}", params.id),
    ))
}

/// POST /api/scheduler/fixed?id=&periodMillis=
pub async fn schedule_fixed_rate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeriodParams>,
) -> ApiResult {
    state
        .scheduler
        .register_fixed_rate(&params.id, params.period_millis)
        .map_err(error_response)?;
    Ok(scheduled(
        &state,
        &params.id,
        format!("Scheduled fixed-rate task {}", params.id),
    ))
}

/// POST /api/scheduler/delay?id=&periodMillis=
pub async fn schedule_fixed_delay(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeriodParams>,
) -> ApiResult {
    state
        .scheduler
        .register_fixed_delay(&params.id, params.period_millis)
        .map_err(error_response)?;
    Ok(scheduled(
        &state,
        &params.id,
        format!("Scheduled fixed-delay task {}", params.id),
    ))
}

/// DELETE /api/scheduler/{id}
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.scheduler.cancel(&id).map_err(error_response)?;
    info!(task_id = %id, "task cancelled via API");
    Ok(Json(json!({"id": id, "message": format!("Cancelled {id}")})))
}

/// GET /api/scheduler/list: `{ "<id>": "SCHEDULED" | "CANCELLED" }`
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.scheduler.list_tasks()))
}

/// GET /api/scheduler/tasks/{id}
pub async fn task_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state
        .scheduler
        .describe(&id)
        .ok_or_else(|| error_response(SchedulerError::NotFound { id }))?;
    Ok(Json(json!(task)))
}
