use axum::{
    routing::{get, post, put},
    Router,
};
use chime_core::config::ChimeConfig;
use chime_scheduler::SchedulerService;
use std::sync::Arc;

/// Shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ChimeConfig,
    pub service: SchedulerService,
}

impl AppState {
    pub fn new(config: ChimeConfig, service: SchedulerService) -> Self {
        Self { config, service }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/task", put(crate::http::tasks::create_task))
        .route("/task/", put(crate::http::tasks::create_task))
        .route(
            "/reschedule/{id}",
            post(crate::http::reschedule::reschedule_handler),
        )
        .route("/status", get(crate::http::status::status_all))
        .route("/status/", get(crate::http::status::status_all))
        .route("/status/{id}", get(crate::http::status::status_one))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
