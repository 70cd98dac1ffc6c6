use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with pool occupancy and task count.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pool = state.scheduler.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.config.gateway.port,
        "pool": pool,
        "tasks": state.scheduler.list_tasks().len(),
    }))
}
