//! Row-level SQL for the `triggers` table.

use querybeat_core::TaskId;
use rusqlite::{Connection, OptionalExtension};

use crate::cron::CronFields;
use crate::error::Result;
use crate::types::Trigger;

const SELECT_COLUMNS: &str = "SELECT task_id, label, minute, hour, day_of_month, month,
            day_of_week, enabled, next_fire, last_fired, updated_at
     FROM triggers";

/// Insert or replace the trigger for `task_id`. `last_fired` survives.
pub fn upsert(
    conn: &Connection,
    task_id: TaskId,
    label: &str,
    fields: &CronFields,
    enabled: bool,
    next_fire: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO triggers
         (task_id, label, minute, hour, day_of_month, month, day_of_week,
          enabled, next_fire, last_fired, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10)
         ON CONFLICT(task_id) DO UPDATE SET
            label = excluded.label,
            minute = excluded.minute,
            hour = excluded.hour,
            day_of_month = excluded.day_of_month,
            month = excluded.month,
            day_of_week = excluded.day_of_week,
            enabled = excluded.enabled,
            next_fire = excluded.next_fire,
            updated_at = excluded.updated_at",
        rusqlite::params![
            task_id,
            label,
            fields.minute,
            fields.hour,
            fields.day_of_month,
            fields.month,
            fields.day_of_week,
            enabled,
            next_fire,
            now
        ],
    )?;
    Ok(())
}

pub fn set_enabled(
    conn: &Connection,
    task_id: TaskId,
    enabled: bool,
    next_fire: Option<&str>,
    now: &str,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE triggers SET enabled = ?1, next_fire = ?2, updated_at = ?3 WHERE task_id = ?4",
        rusqlite::params![enabled, next_fire, now, task_id],
    )?;
    Ok(n)
}

pub fn delete(conn: &Connection, task_id: TaskId) -> Result<usize> {
    Ok(conn.execute("DELETE FROM triggers WHERE task_id = ?1", [task_id])?)
}

pub fn get(conn: &Connection, task_id: TaskId) -> Result<Option<Trigger>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE task_id = ?1"),
            [task_id],
            row_to_trigger,
        )
        .optional()?;
    Ok(row)
}

pub fn list(conn: &Connection) -> Result<Vec<Trigger>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY task_id"))?;
    let rows = stmt.query_map([], row_to_trigger)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Enabled triggers whose next slot is at or before `now`.
pub fn due(conn: &Connection, now: &str) -> Result<Vec<Trigger>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{SELECT_COLUMNS}
         WHERE enabled = 1 AND next_fire IS NOT NULL AND next_fire <= ?1
         ORDER BY next_fire, task_id"
    ))?;
    let rows = stmt.query_map([now], row_to_trigger)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Move `next_fire` forward only if it still holds `expected`.
///
/// Returns `false` when another tick (or an upsert) already moved it, so
/// each slot is claimed at most once.
pub fn advance(
    conn: &Connection,
    task_id: TaskId,
    expected: &str,
    next_fire: Option<&str>,
    fired_at: Option<&str>,
    now: &str,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE triggers
         SET next_fire = ?1, last_fired = COALESCE(?2, last_fired), updated_at = ?3
         WHERE task_id = ?4 AND enabled = 1 AND next_fire = ?5",
        rusqlite::params![next_fire, fired_at, now, task_id, expected],
    )?;
    Ok(n == 1)
}

pub(crate) fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trigger> {
    Ok(Trigger {
        task_id: row.get(0)?,
        label: row.get(1)?,
        fields: CronFields {
            minute: row.get(2)?,
            hour: row.get(3)?,
            day_of_month: row.get(4)?,
            month: row.get(5)?,
            day_of_week: row.get(6)?,
        },
        enabled: row.get(7)?,
        next_fire: row.get(8)?,
        last_fired: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
