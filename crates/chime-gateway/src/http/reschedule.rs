use axum::{
    extract::{Path, Query, State},
    Json,
};
use chime_scheduler::TaskRef;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

use super::{error_response, non_empty, ApiError, TaskSummary};
use crate::app::AppState;

/// POST /reschedule/{id}?trigger_at=<spec>&all
///
/// `id` is a tag, `tag@ts` or a full task id. Only failed tasks are moved
/// unless `all` is present. Without `trigger_at` the tasks fire next minute.
pub async fn reschedule_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let task_ref = TaskRef::parse(&id).map_err(|e| error_response(&e))?;
    let trigger_at = non_empty(params.get("trigger_at"));
    let include_all = params.contains_key("all");

    let moved = state
        .service
        .reschedule(&task_ref, trigger_at, include_all)
        .map_err(|e| error_response(&e))?;

    let summaries: Vec<TaskSummary<'_>> = moved.iter().map(TaskSummary::from).collect();
    Ok(Json(json!(summaries)))
}
