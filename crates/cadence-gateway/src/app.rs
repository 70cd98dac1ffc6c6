use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use cadence_core::config::CadenceConfig;
use cadence_scheduler::SchedulerHandle;

/// Shared state handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: CadenceConfig,
    /// The only way handlers reach the scheduler.
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn new(config: CadenceConfig, scheduler: SchedulerHandle) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, tasks};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/scheduler/cron", post(tasks::schedule_cron))
        .route("/api/scheduler/fixed", post(tasks::schedule_fixed_rate))
        .route("/api/scheduler/delay", post(tasks::schedule_fixed_delay))
        .route("/api/scheduler/list", get(tasks::list_tasks))
        .route("/api/scheduler/tasks/{id}", get(tasks::task_detail))
        .route("/api/scheduler/{id}", delete(tasks::cancel_task))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
