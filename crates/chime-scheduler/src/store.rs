use std::sync::{Mutex, MutexGuard};

use rusqlite::{types::Value, Connection, OptionalExtension, Row};
use tracing::{debug, instrument};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{Task, TaskKey, TaskState},
};

/// Raw column values of one `tasks` row, before enum and range checks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub trigger_at: i64,
    pub tag: String,
    pub unique_id: String,
    pub callback: String,
    pub callback_method: String,
    pub payload: String,
    pub retry: i64,
    pub expected_http_status: i64,
    pub max_delay: i64,
    pub task_state: String,
    pub response_status: Option<i64>,
    pub response_body: Option<String>,
    pub executed_at: Option<i64>,
}

impl TaskRow {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.trigger_at, self.tag.clone(), self.unique_id.clone())
    }
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            trigger_at: task.trigger_at,
            tag: task.tag.clone(),
            unique_id: task.unique_id.clone(),
            callback: task.callback.clone(),
            callback_method: task.callback_method.to_string(),
            payload: task.payload.clone(),
            retry: i64::from(task.retry),
            expected_http_status: i64::from(task.expected_http_status),
            max_delay: i64::from(task.max_delay),
            task_state: task.task_state.to_string(),
            response_status: task.response_status.map(i64::from),
            response_body: task.response_body.clone(),
            executed_at: task.executed_at,
        }
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = SchedulerError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let key = row.key().format();
        let invalid = |reason: String| SchedulerError::InvalidRow {
            key: key.clone(),
            reason,
        };

        let callback_method = row
            .callback_method
            .parse()
            .map_err(|e: SchedulerError| invalid(e.to_string()))?;
        let task_state = row.task_state.parse().map_err(|e: String| invalid(e))?;
        let retry = u32::try_from(row.retry).map_err(|_| invalid(format!("retry {}", row.retry)))?;
        let expected_http_status = u16::try_from(row.expected_http_status)
            .map_err(|_| invalid(format!("expected_http_status {}", row.expected_http_status)))?;
        let max_delay = u32::try_from(row.max_delay)
            .map_err(|_| invalid(format!("max_delay {}", row.max_delay)))?;
        let response_status = row
            .response_status
            .map(|s| u16::try_from(s).map_err(|_| invalid(format!("response_status {s}"))))
            .transpose()?;

        Ok(Task {
            trigger_at: row.trigger_at,
            tag: row.tag,
            unique_id: row.unique_id,
            callback: row.callback,
            callback_method,
            payload: row.payload,
            retry,
            expected_http_status,
            max_delay,
            task_state,
            response_status,
            response_body: row.response_body,
            executed_at: row.executed_at,
        })
    }
}

/// Which index a [`TaskStore::query`] walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    /// Primary partition: every task due at one minute, ordered by `(tag, unique_id)`.
    TriggerAt(i64),
    /// Inverted index: every occurrence of a tag, ordered by `(trigger_at, unique_id)`.
    Tag(String),
}

/// Extra row predicates applied on top of an index lookup or scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub trigger_at_lte: Option<i64>,
    pub trigger_at_gte: Option<i64>,
    pub trigger_at_gt: Option<i64>,
    pub state: Option<TaskState>,
}

impl TaskFilter {
    /// `pending` rows due at or before `now`.
    pub fn due(now: i64) -> Self {
        Self {
            trigger_at_lte: Some(now),
            state: Some(TaskState::Pending),
            ..Default::default()
        }
    }

    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Rows due exactly at `minute`.
    pub fn at_minute(minute: i64) -> Self {
        Self {
            trigger_at_lte: Some(minute),
            trigger_at_gte: Some(minute),
            ..Default::default()
        }
    }

    pub fn at_or_after(ts: i64) -> Self {
        Self {
            trigger_at_gte: Some(ts),
            ..Default::default()
        }
    }

    pub fn after(ts: i64) -> Self {
        Self {
            trigger_at_gt: Some(ts),
            ..Default::default()
        }
    }

    fn push_sql(&self, clauses: &mut Vec<&'static str>, params: &mut Vec<Value>) {
        if let Some(ts) = self.trigger_at_lte {
            clauses.push("trigger_at <= ?");
            params.push(Value::Integer(ts));
        }
        if let Some(ts) = self.trigger_at_gte {
            clauses.push("trigger_at >= ?");
            params.push(Value::Integer(ts));
        }
        if let Some(ts) = self.trigger_at_gt {
            clauses.push("trigger_at > ?");
            params.push(Value::Integer(ts));
        }
        if let Some(state) = self.state {
            clauses.push("task_state = ?");
            params.push(Value::Text(state.to_string()));
        }
    }
}

/// One page of results. `next` is the key of the last item when more rows
/// follow; pass it back as the cursor to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<TaskKey>,
}

/// Persistence operations the scheduler needs. Every call is a single
/// statement against a single table.
pub trait TaskStore: Send + Sync {
    fn get(&self, key: &TaskKey) -> Result<Option<TaskRow>>;

    /// Insert or replace the row identified by the task's key.
    fn put(&self, task: &Task) -> Result<()>;

    /// Set `task_state` to `to` only if it is currently `from`.
    /// Returns whether the row changed.
    fn transition(&self, key: &TaskKey, from: TaskState, to: TaskState) -> Result<bool>;

    /// Walk one index in key order, resuming strictly after `start_after`.
    fn query(
        &self,
        index: &IndexKey,
        filter: &TaskFilter,
        start_after: Option<&TaskKey>,
        limit: usize,
    ) -> Result<Page<TaskRow>>;

    /// Walk the whole table in `(trigger_at, tag, unique_id)` order.
    fn scan(
        &self,
        filter: &TaskFilter,
        start_after: Option<&TaskKey>,
        limit: usize,
    ) -> Result<Page<TaskRow>>;
}

const SELECT_COLUMNS: &str = "SELECT trigger_at, tag, unique_id, callback, callback_method, payload,
        retry, expected_http_status, max_delay, task_state,
        response_status, response_body, executed_at
 FROM tasks";

/// SQLite-backed [`TaskStore`].
///
/// Wraps a single connection in a `Mutex`; open one store per component
/// that needs its own connection.
pub struct SqliteTaskStore {
    db: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Wrap an open connection and make sure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn page(
        &self,
        mut clauses: Vec<&'static str>,
        mut params: Vec<Value>,
        order_by: &str,
        limit: usize,
    ) -> Result<Page<TaskRow>> {
        let limit = limit.max(1);
        let mut sql = SELECT_COLUMNS.to_string();
        if clauses.is_empty() {
            clauses.push("1 = 1");
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let db = self.conn();
        let mut stmt = db.prepare_cached(&sql)?;
        let mut items = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_task_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next = if items.len() > limit {
            items.truncate(limit);
            items.last().map(TaskRow::key)
        } else {
            None
        };
        debug!(rows = items.len(), more = next.is_some(), "page fetched");
        Ok(Page { items, next })
    }
}

impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self), fields(key = %key))]
    fn get(&self, key: &TaskKey) -> Result<Option<TaskRow>> {
        let db = self.conn();
        let sql = format!("{SELECT_COLUMNS} WHERE trigger_at = ?1 AND tag = ?2 AND unique_id = ?3");
        let row = db
            .query_row(
                &sql,
                rusqlite::params![key.trigger_at, key.tag, key.unique_id],
                row_to_task_row,
            )
            .optional()?;
        Ok(row)
    }

    #[instrument(skip(self, task), fields(key = %task.key(), state = %task.task_state))]
    fn put(&self, task: &Task) -> Result<()> {
        let row = TaskRow::from(task);
        let db = self.conn();
        db.execute(
            "INSERT OR REPLACE INTO tasks
             (trigger_at, tag, unique_id, callback, callback_method, payload,
              retry, expected_http_status, max_delay, task_state,
              response_status, response_body, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                row.trigger_at,
                row.tag,
                row.unique_id,
                row.callback,
                row.callback_method,
                row.payload,
                row.retry,
                row.expected_http_status,
                row.max_delay,
                row.task_state,
                row.response_status,
                row.response_body,
                row.executed_at,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    fn transition(&self, key: &TaskKey, from: TaskState, to: TaskState) -> Result<bool> {
        let db = self.conn();
        let changed = db.execute(
            "UPDATE tasks SET task_state = ?1
             WHERE trigger_at = ?2 AND tag = ?3 AND unique_id = ?4 AND task_state = ?5",
            rusqlite::params![
                to.as_str(),
                key.trigger_at,
                key.tag,
                key.unique_id,
                from.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    #[instrument(skip(self, filter, start_after))]
    fn query(
        &self,
        index: &IndexKey,
        filter: &TaskFilter,
        start_after: Option<&TaskKey>,
        limit: usize,
    ) -> Result<Page<TaskRow>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        let order_by = match index {
            IndexKey::TriggerAt(minute) => {
                clauses.push("trigger_at = ?");
                params.push(Value::Integer(*minute));
                if let Some(cursor) = start_after {
                    clauses.push("(tag, unique_id) > (?, ?)");
                    params.push(Value::Text(cursor.tag.clone()));
                    params.push(Value::Text(cursor.unique_id.clone()));
                }
                "tag, unique_id"
            }
            IndexKey::Tag(tag) => {
                clauses.push("tag = ?");
                params.push(Value::Text(tag.clone()));
                if let Some(cursor) = start_after {
                    clauses.push("(trigger_at, unique_id) > (?, ?)");
                    params.push(Value::Integer(cursor.trigger_at));
                    params.push(Value::Text(cursor.unique_id.clone()));
                }
                "trigger_at, unique_id"
            }
        };
        filter.push_sql(&mut clauses, &mut params);

        self.page(clauses, params, order_by, limit)
    }

    #[instrument(skip(self, filter, start_after))]
    fn scan(
        &self,
        filter: &TaskFilter,
        start_after: Option<&TaskKey>,
        limit: usize,
    ) -> Result<Page<TaskRow>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(cursor) = start_after {
            clauses.push("(trigger_at, tag, unique_id) > (?, ?, ?)");
            params.push(Value::Integer(cursor.trigger_at));
            params.push(Value::Text(cursor.tag.clone()));
            params.push(Value::Text(cursor.unique_id.clone()));
        }
        filter.push_sql(&mut clauses, &mut params);

        self.page(clauses, params, "trigger_at, tag, unique_id", limit)
    }
}

fn row_to_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        trigger_at: row.get(0)?,
        tag: row.get(1)?,
        unique_id: row.get(2)?,
        callback: row.get(3)?,
        callback_method: row.get(4)?,
        payload: row.get(5)?,
        retry: row.get(6)?,
        expected_http_status: row.get(7)?,
        max_delay: row.get(8)?,
        task_state: row.get(9)?,
        response_status: row.get(10)?,
        response_body: row.get(11)?,
        executed_at: row.get(12)?,
    })
}
