use axum::{body::Bytes, extract::State, Json};
use chime_scheduler::CreateTaskRequest;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::{bad_request, error_response, ApiError};
use crate::app::AppState;

/// PUT /task: schedule a new callback.
///
/// Returns `{"task_id": "<tag>+<suffix>@<trigger_at>"}`.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: CreateTaskRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in task body");
        bad_request(format!("invalid JSON body: {e}"))
    })?;

    let task = state.service.create(req).map_err(|e| error_response(&e))?;
    Ok(Json(json!({"task_id": task.key().format()})))
}
