use std::sync::Arc;

use chime_core::clock::{current_minute, unix_now};
use tracing::{error, info, warn};

use crate::{
    store::TaskStore,
    transport::{CallbackRequest, CallbackTransport},
    types::{Task, TaskState},
};

/// How a single execution ended. Informational only; the persisted task is
/// the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Picked up after the max-delay window; no request was sent.
    Skipped,
    /// Another dispatch already owns the task.
    AlreadyClaimed,
    Successful { status: u16 },
    Failed { status: Option<u16> },
}

/// Runs one task: claim, call back, record the result.
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn CallbackTransport>,
}

impl Executor {
    pub fn new(store: Arc<dyn TaskStore>, transport: Arc<dyn CallbackTransport>) -> Self {
        Self { store, transport }
    }

    pub async fn execute(&self, task: Task) -> ExecutionOutcome {
        self.execute_at(task, current_minute()).await
    }

    /// Execute `task` as if the current minute were `now_minute`.
    pub async fn execute_at(&self, mut task: Task, now_minute: i64) -> ExecutionOutcome {
        let key = task.key();

        if task.is_past_max_delay(now_minute) {
            warn!(task = %key, max_delay = task.max_delay, "max delay exceeded, skipping callback");
            if let Err(e) = self
                .store
                .transition(&key, TaskState::Pending, TaskState::Skipped)
            {
                error!(task = %key, "failed to mark task skipped: {e}");
            }
            return ExecutionOutcome::Skipped;
        }

        match self
            .store
            .transition(&key, TaskState::Pending, TaskState::Running)
        {
            Ok(true) => {}
            Ok(false) => {
                info!(task = %key, "task already claimed, not executing");
                return ExecutionOutcome::AlreadyClaimed;
            }
            Err(e) => {
                // at-least-once: run anyway
                error!(task = %key, "failed to claim task: {e}");
            }
        }
        task.task_state = TaskState::Running;

        info!(task = %key, callback = %task.callback, method = %task.callback_method, "executing callback");
        let response = self
            .transport
            .send_with_retry(&CallbackRequest::for_task(&task))
            .await;

        task.record_response(response.status, &response.body, unix_now());
        info!(
            task = %key,
            state = %task.task_state,
            status = ?response.status,
            attempts = response.attempts,
            "callback finished"
        );

        if let Err(e) = self.store.put(&task) {
            error!(task = %key, "failed to store callback result: {e}");
        }

        match (task.task_state, response.status) {
            (TaskState::Successful, Some(status)) => ExecutionOutcome::Successful { status },
            (_, status) => ExecutionOutcome::Failed { status },
        }
    }
}
