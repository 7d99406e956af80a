//! Row-level SQL for the `tasks` table.
//!
//! Every function borrows a plain [`Connection`]; a `rusqlite::Transaction`
//! derefs to one, so callers decide the transactional scope.

use chrono::{DateTime, Utc};
use querybeat_core::types::timestamp;
use querybeat_core::{ConnectionConfig, RetryPolicy, TaskDefinition, TaskDraft, TaskId};
use rusqlite::{Connection, OptionalExtension};

use crate::connections;
use crate::error::{CatalogError, Result};

const SELECT_COLUMNS: &str = "SELECT id, name, query, schedule, is_active, connection_id,
            max_retries, retry_delay_ms, last_run, created_at, updated_at
     FROM tasks";

/// Insert (`draft.id == None`) or replace (`Some(id)`) a task row.
///
/// `default_retry` fills in drafts that carry no retry policy.
pub fn upsert(
    conn: &Connection,
    draft: &TaskDraft,
    default_retry: RetryPolicy,
) -> Result<TaskDefinition> {
    if connections::get(conn, draft.connection_id)?.is_none() {
        return Err(CatalogError::ConnectionNotFound {
            id: draft.connection_id,
        });
    }

    let retry = draft.retry.unwrap_or(default_retry);
    let now = timestamp(Utc::now());

    let id = match draft.id {
        Some(id) => {
            let changed = conn.execute(
                "UPDATE tasks
                 SET name = ?1, query = ?2, schedule = ?3, is_active = ?4,
                     connection_id = ?5, max_retries = ?6, retry_delay_ms = ?7,
                     updated_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    draft.name,
                    draft.query,
                    draft.schedule,
                    draft.is_active,
                    draft.connection_id,
                    retry.max_retries as i64,
                    retry.retry_delay_ms as i64,
                    now,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(CatalogError::TaskNotFound { id });
            }
            id
        }
        None => {
            conn.execute(
                "INSERT INTO tasks
                 (name, query, schedule, is_active, connection_id,
                  max_retries, retry_delay_ms, last_run, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
                rusqlite::params![
                    draft.name,
                    draft.query,
                    draft.schedule,
                    draft.is_active,
                    draft.connection_id,
                    retry.max_retries as i64,
                    retry.retry_delay_ms as i64,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    get(conn, id)?.ok_or(CatalogError::TaskNotFound { id })
}

pub fn get(conn: &Connection, id: TaskId) -> Result<Option<TaskDefinition>> {
    let row = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_task)
        .optional()?;
    Ok(row)
}

pub fn list(conn: &Connection) -> Result<Vec<TaskDefinition>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
    let rows = stmt.query_map([], row_to_task)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Flip the active flag only. Returns the updated row.
pub fn set_active(conn: &Connection, id: TaskId, is_active: bool) -> Result<TaskDefinition> {
    let now = timestamp(Utc::now());
    let changed = conn.execute(
        "UPDATE tasks SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![is_active, now, id],
    )?;
    if changed == 0 {
        return Err(CatalogError::TaskNotFound { id });
    }
    get(conn, id)?.ok_or(CatalogError::TaskNotFound { id })
}

/// Delete a task row. `TaskNotFound` when nothing was deleted.
pub fn delete(conn: &Connection, id: TaskId) -> Result<()> {
    let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(CatalogError::TaskNotFound { id });
    }
    Ok(())
}

pub fn touch_last_run(conn: &Connection, id: TaskId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET last_run = ?1 WHERE id = ?2",
        rusqlite::params![timestamp(at), id],
    )?;
    Ok(())
}

/// Current task and its connection, read together for an execution attempt.
pub fn load_with_connection(
    conn: &Connection,
    id: TaskId,
) -> Result<Option<(TaskDefinition, ConnectionConfig)>> {
    let Some(task) = get(conn, id)? else {
        return Ok(None);
    };
    let source = connections::get(conn, task.connection_id)?.ok_or(
        CatalogError::ConnectionNotFound {
            id: task.connection_id,
        },
    )?;
    Ok(Some((task, source)))
}

pub(crate) fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskDefinition> {
    Ok(TaskDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        query: row.get(2)?,
        schedule: row.get(3)?,
        is_active: row.get(4)?,
        connection_id: row.get(5)?,
        retry: RetryPolicy {
            max_retries: row.get::<_, i64>(6)? as u32,
            retry_delay_ms: row.get::<_, i64>(7)? as u64,
        },
        last_run: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
