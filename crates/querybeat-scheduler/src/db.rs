use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the catalog tables first because `triggers.task_id` references
/// `tasks(id)`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    querybeat_catalog::db::init_db(conn)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS triggers (
            task_id       INTEGER NOT NULL PRIMARY KEY
                          REFERENCES tasks(id) ON DELETE CASCADE,
            label         TEXT    NOT NULL,
            minute        TEXT    NOT NULL,
            hour          TEXT    NOT NULL,
            day_of_month  TEXT    NOT NULL,
            month         TEXT    NOT NULL,
            day_of_week   TEXT    NOT NULL,
            enabled       INTEGER NOT NULL DEFAULT 1,
            next_fire     TEXT,               -- ISO-8601 or NULL when disabled
            last_fired    TEXT,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Dispatcher polling: WHERE enabled = 1 AND next_fire <= ?
        CREATE INDEX IF NOT EXISTS idx_triggers_next_fire ON triggers (enabled, next_fire);
        ",
    )?;
    Ok(())
}
