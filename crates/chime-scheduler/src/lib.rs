//! `chime-scheduler`: minute-resolution deferred HTTP callbacks with SQLite
//! persistence.
//!
//! # Overview
//!
//! Tasks are stored in a SQLite `tasks` table keyed by
//! `(trigger_at, tag, unique_id)`. The [`engine::SchedulerEngine`] wakes once a
//! minute, picks the `pending` tasks due at that minute and hands them to the
//! [`dispatch::Dispatcher`], which runs them on a bounded worker pool through
//! the [`executor::Executor`]. A catchup pass replays `pending` tasks whose
//! minute passed while the process was down.
//!
//! # Task lifecycle
//!
//! | State        | Reached when                                           |
//! |--------------|--------------------------------------------------------|
//! | `pending`    | created or rescheduled                                 |
//! | `running`    | claimed by an executor                                 |
//! | `successful` | the final response carried the expected status         |
//! | `failed`     | attempts exhausted, a 4xx came back, or no response    |
//! | `skipped`    | picked up after its max-delay window                   |
//!
//! # Wire identity
//!
//! `<tag>+<unique_id>@<trigger_at>`, e.g. `invoice42+9f1c…@1700000040`.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod service;
pub mod store;
pub mod task;
pub mod transport;
pub mod types;

pub use dispatch::Dispatcher;
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{ExecutionOutcome, Executor};
pub use service::{SchedulerService, StatusPage};
pub use store::{SqliteTaskStore, TaskStore};
pub use transport::{CallbackTransport, HttpTransport};
pub use types::{CreateTaskRequest, HttpMethod, Task, TaskKey, TaskRef, TaskState};
