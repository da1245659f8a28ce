use rusqlite::Connection;

use crate::error::Result;

/// Initialise the task schema in `conn`.
///
/// The primary key doubles as the minute partition index used by the tick
/// loop; `idx_tasks_tag` is the inverted tag index used for status and
/// reschedule lookups by name.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            trigger_at           INTEGER NOT NULL,   -- minute-aligned Unix seconds
            tag                  TEXT    NOT NULL,
            unique_id            TEXT    NOT NULL,
            callback             TEXT    NOT NULL,
            callback_method      TEXT    NOT NULL,
            payload              TEXT    NOT NULL DEFAULT '',
            retry                INTEGER NOT NULL,
            expected_http_status INTEGER NOT NULL,
            max_delay            INTEGER NOT NULL,   -- minutes
            task_state           TEXT    NOT NULL DEFAULT 'pending',
            response_status      INTEGER,            -- NULL until a response arrives
            response_body        TEXT,
            executed_at          INTEGER,
            PRIMARY KEY (trigger_at, tag, unique_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_tag ON tasks (tag, trigger_at, unique_id);
        ",
    )?;
    Ok(())
}
