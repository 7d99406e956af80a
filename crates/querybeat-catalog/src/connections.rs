//! Row-level SQL for the `connections` table.

use chrono::Utc;
use querybeat_core::types::timestamp;
use querybeat_core::{ConnectionConfig, ConnectionId, NewConnection};
use rusqlite::{Connection, ErrorCode, OptionalExtension};

use crate::error::{CatalogError, Result};

const SELECT_COLUMNS: &str =
    "SELECT id, name, host, port, database_name, username, password FROM connections";

pub fn insert(conn: &Connection, new: &NewConnection) -> Result<ConnectionConfig> {
    let now = timestamp(Utc::now());
    conn.execute(
        "INSERT INTO connections
         (name, host, port, database_name, username, password, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            new.name,
            new.host,
            new.port,
            new.database_name,
            new.username,
            new.password,
            now
        ],
    )
    .map_err(|e| unique_violation(e, &new.name))?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or(CatalogError::ConnectionNotFound { id })
}

pub fn update(conn: &Connection, id: ConnectionId, new: &NewConnection) -> Result<ConnectionConfig> {
    let now = timestamp(Utc::now());
    let changed = conn
        .execute(
            "UPDATE connections
             SET name = ?1, host = ?2, port = ?3, database_name = ?4,
                 username = ?5, password = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                new.name,
                new.host,
                new.port,
                new.database_name,
                new.username,
                new.password,
                now,
                id
            ],
        )
        .map_err(|e| unique_violation(e, &new.name))?;
    if changed == 0 {
        return Err(CatalogError::ConnectionNotFound { id });
    }
    get(conn, id)?.ok_or(CatalogError::ConnectionNotFound { id })
}

pub fn get(conn: &Connection, id: ConnectionId) -> Result<Option<ConnectionConfig>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_connection,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ConnectionConfig>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE name = ?1"),
            [name],
            row_to_connection,
        )
        .optional()?;
    Ok(row)
}

pub fn list(conn: &Connection) -> Result<Vec<ConnectionConfig>> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name"))?;
    let rows = stmt.query_map([], row_to_connection)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Number of tasks that still reference the connection.
pub fn usage(conn: &Connection, id: ConnectionId) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE connection_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn delete(conn: &Connection, id: ConnectionId) -> Result<()> {
    let tasks = usage(conn, id)?;
    if tasks > 0 {
        return Err(CatalogError::ConnectionInUse { id, tasks });
    }
    let changed = conn.execute("DELETE FROM connections WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(CatalogError::ConnectionNotFound { id });
    }
    Ok(())
}

fn unique_violation(e: rusqlite::Error, name: &str) -> CatalogError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            CatalogError::DuplicateConnectionName {
                name: name.to_string(),
            }
        }
        other => CatalogError::Database(other),
    }
}

pub(crate) fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionConfig> {
    Ok(ConnectionConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        database_name: row.get(4)?,
        username: row.get(5)?,
        password: row.get(6)?,
    })
}
