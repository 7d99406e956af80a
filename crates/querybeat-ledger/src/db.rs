use rusqlite::{Connection, Result};

/// Initialise ledger tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_executions_table(conn)?;
    create_execution_events_table(conn)?;
    Ok(())
}

/// One row per execution token. `task_id` carries no foreign key: history
/// outlives the task, and a run of a missing task is still recorded.
fn create_executions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS executions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            token          TEXT    NOT NULL UNIQUE,
            task_id        INTEGER NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'PENDING',
            retry_count    INTEGER NOT NULL DEFAULT 0,
            result         TEXT,               -- JSON QueryPayload on SUCCESS
            error_message  TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_executions_task
            ON executions(task_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_executions_status
            ON executions(status, updated_at DESC);",
    )
}

/// Append-only trail of every status transition.
fn create_execution_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS execution_events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            token        TEXT    NOT NULL,
            status       TEXT    NOT NULL,
            retry_count  INTEGER NOT NULL,
            detail       TEXT,
            recorded_at  TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_execution_events_token
            ON execution_events(token, id);",
    )
}
