use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The trigger time is neither a future minute-aligned timestamp nor `+<N>{m|h|d}`.
    #[error("invalid time specification: {0}")]
    InvalidTimeSpec(String),

    /// A required field of a create request is empty.
    #[error("incomplete task: {field} is required")]
    IncompleteTask { field: &'static str },

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Tags (and unique suffixes) must be `[A-Za-z0-9]`.
    #[error("invalid tag {0:?}: only [A-Za-z0-9] is allowed")]
    InvalidTag(String),

    #[error("invalid callback URL {url:?}: {reason}")]
    InvalidCallbackUrl { url: String, reason: String },

    #[error("{field} must be a non-negative integer")]
    NegativeField { field: &'static str },

    /// A wire identity (`<tag>[+<suffix>]@<trigger_at>`) could not be parsed.
    #[error("invalid task id {id:?}: {reason}")]
    InvalidTaskId { id: String, reason: String },

    /// A stored row could not be turned back into a task.
    #[error("invalid stored task {key}: {reason}")]
    InvalidRow { key: String, reason: String },

    #[error("task not found: {id}")]
    NotFound { id: String },

    /// Read path failure; the underlying cause is logged, not returned.
    #[error("failed to retrieve status")]
    LookupFailed,

    /// Write path failure; the underlying cause is logged, not returned.
    #[error("failed to store task")]
    StoreFailed,

    /// The dispatch queue is full; the task stays pending for the next catchup.
    #[error("dispatch queue full, task {key} not accepted")]
    QueueFull { key: String },

    #[error("dispatcher is shut down")]
    DispatcherClosed,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl SchedulerError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::InvalidTimeSpec(_) => "INVALID_TIME_SPEC",
            SchedulerError::IncompleteTask { .. } => "INCOMPLETE_TASK",
            SchedulerError::UnsupportedMethod(_) => "UNSUPPORTED_METHOD",
            SchedulerError::InvalidTag(_) => "INVALID_TAG",
            SchedulerError::InvalidCallbackUrl { .. } => "INVALID_CALLBACK_URL",
            SchedulerError::NegativeField { .. } => "NEGATIVE_FIELD",
            SchedulerError::InvalidTaskId { .. } => "INVALID_TASK_ID",
            SchedulerError::InvalidRow { .. } => "INVALID_ROW",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::LookupFailed => "LOOKUP_FAILED",
            SchedulerError::StoreFailed => "STORE_FAILED",
            SchedulerError::QueueFull { .. } => "QUEUE_FULL",
            SchedulerError::DispatcherClosed => "DISPATCHER_CLOSED",
            SchedulerError::Client(_) => "CLIENT_ERROR",
        }
    }

    /// True for errors caused by caller input rather than by the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidTimeSpec(_)
                | SchedulerError::IncompleteTask { .. }
                | SchedulerError::UnsupportedMethod(_)
                | SchedulerError::InvalidTag(_)
                | SchedulerError::InvalidCallbackUrl { .. }
                | SchedulerError::NegativeField { .. }
                | SchedulerError::InvalidTaskId { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
