use rusqlite::Connection;

use crate::error::Result;

/// Initialise the connections and tasks tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS connections (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL UNIQUE,
            host          TEXT    NOT NULL,
            port          INTEGER NOT NULL DEFAULT 5432,
            database_name TEXT    NOT NULL,
            username      TEXT    NOT NULL,
            password      TEXT    NOT NULL,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT    NOT NULL,
            query          TEXT    NOT NULL,
            schedule       TEXT    NOT NULL,   -- five-field cron expression
            is_active      INTEGER NOT NULL DEFAULT 1,
            connection_id  INTEGER NOT NULL REFERENCES connections(id) ON DELETE RESTRICT,
            max_retries    INTEGER NOT NULL DEFAULT 0,
            retry_delay_ms INTEGER NOT NULL DEFAULT 0,
            last_run       TEXT,               -- ISO-8601 or NULL
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_connection
            ON tasks(connection_id);",
    )?;
    Ok(())
}
