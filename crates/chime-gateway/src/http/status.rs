use axum::{
    extract::{Path, Query, State},
    Json,
};
use chime_scheduler::{TaskKey, TaskRef};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

use super::{error_response, non_empty, ApiError, TaskSummary};
use crate::app::AppState;

/// GET /status?start_from=<id>&future_only: every task, paginated.
pub async fn status_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    status_page(&state, None, &params)
}

/// GET /status/{id}?start_from=<id>&future_only
///
/// `id` is a tag, `tag@ts` or a full task id.
pub async fn status_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let task_ref = TaskRef::parse(&id).map_err(|e| error_response(&e))?;
    status_page(&state, Some(&task_ref), &params)
}

fn status_page(
    state: &AppState,
    task_ref: Option<&TaskRef>,
    params: &HashMap<String, String>,
) -> Result<Json<Value>, ApiError> {
    // an unescaped `+` in the cursor arrives as a space
    let start_from = non_empty(params.get("start_from"))
        .map(|cursor| TaskKey::parse(&cursor.replace(' ', "+")))
        .transpose()
        .map_err(|e| error_response(&e))?;
    let future_only = params.contains_key("future_only");

    let page = state
        .service
        .status(task_ref, start_from.as_ref(), future_only)
        .map_err(|e| error_response(&e))?;

    let tasks: Vec<TaskSummary<'_>> = page.tasks.iter().map(TaskSummary::from).collect();
    Ok(Json(json!({
        "tasks": tasks,
        "next": page.next,
    })))
}
