pub mod health;
pub mod reschedule;
pub mod status;
pub mod tasks;

use axum::{http::StatusCode, Json};
use chime_scheduler::{SchedulerError, Task};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<Value>);

/// Map a scheduler error onto an HTTP status and `{"error", "code"}` body.
pub fn error_response(e: &SchedulerError) -> ApiError {
    let status = if e.is_validation() {
        debug!(code = e.code(), "rejected request: {e}");
        StatusCode::BAD_REQUEST
    } else if matches!(e, SchedulerError::NotFound { .. }) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({"error": e.to_string(), "code": e.code()})))
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.into()})),
    )
}

/// A task as returned by the API: its wire id next to the stored fields.
#[derive(Serialize)]
pub struct TaskSummary<'a> {
    pub task_id: String,
    #[serde(flatten)]
    pub task: &'a Task,
}

impl<'a> From<&'a Task> for TaskSummary<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            task_id: task.key().format(),
            task,
        }
    }
}

/// Treat `?name=` the same as an absent parameter.
fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}
