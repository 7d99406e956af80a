use std::sync::Mutex;

use chrono::Utc;
use querybeat_core::types::timestamp;
use querybeat_core::{ExecutionStatus, ExecutionToken, QueryPayload, TaskId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::db::init_db;
use crate::error::{LedgerError, Result};
use crate::types::{ExecutionEvent, ExecutionRecord, LedgerFilter};

const SELECT_COLUMNS: &str = "SELECT id, token, task_id, status, retry_count, result,
            error_message, created_at, updated_at
     FROM executions";

/// Durable lifecycle store for executions.
///
/// One row per execution token. Every transition is a guarded `UPDATE` that
/// only matches a non-terminal row, so a redelivered or late attempt can never
/// overwrite a terminal state or produce a second row. Each applied
/// transition also appends to `execution_events`.
pub struct ExecutionLedger {
    db: Mutex<Connection>,
}

impl ExecutionLedger {
    /// Wrap a connection, creating the ledger tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Admit an attempt for `token`.
    ///
    /// Creates the PENDING row on first sight of the token. For a known
    /// token a RETRY row moves back to PENDING; a PENDING row (redelivery
    /// after a crash) is returned as-is; a terminal row is returned untouched
    /// and the caller must not run the attempt.
    #[instrument(skip(self), fields(token = %token))]
    pub fn admit(&self, token: &ExecutionToken, task_id: TaskId) -> Result<ExecutionRecord> {
        let mut db = self.db.lock().expect("ledger db mutex poisoned");
        let tx = db.transaction()?;
        let now = timestamp(Utc::now());

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO executions
             (token, task_id, status, retry_count, result, error_message, created_at, updated_at)
             VALUES (?1, ?2, 'PENDING', 0, NULL, NULL, ?3, ?3)",
            rusqlite::params![token.as_str(), task_id, now],
        )?;
        if inserted == 1 {
            append_event(&tx, token, ExecutionStatus::Pending, 0, None, &now)?;
            debug!(task_id, "execution admitted");
        } else {
            let resumed = tx.execute(
                "UPDATE executions SET status = 'PENDING', updated_at = ?1
                 WHERE token = ?2 AND status = 'RETRY'",
                rusqlite::params![now, token.as_str()],
            )?;
            if resumed == 1 {
                let retry_count = current_retry_count(&tx, token)?;
                append_event(&tx, token, ExecutionStatus::Pending, retry_count, None, &now)?;
                debug!(task_id, retry_count, "retry admitted");
            }
        }

        let record = get_record(&tx, token)?.ok_or_else(|| LedgerError::ExecutionNotFound {
            token: token.to_string(),
        })?;
        tx.commit()?;
        Ok(record)
    }

    /// PENDING -> RETRY with the new retry count and the error that caused it.
    ///
    /// Returns `false` when the row is not PENDING or the count would not
    /// increase.
    #[instrument(skip(self, error), fields(token = %token))]
    pub fn mark_retry(
        &self,
        token: &ExecutionToken,
        retry_count: u32,
        error: &str,
    ) -> Result<bool> {
        let mut db = self.db.lock().expect("ledger db mutex poisoned");
        let tx = db.transaction()?;
        let now = timestamp(Utc::now());
        let n = tx.execute(
            "UPDATE executions
             SET status = 'RETRY', retry_count = ?1, error_message = ?2, updated_at = ?3
             WHERE token = ?4 AND status = 'PENDING' AND retry_count < ?1",
            rusqlite::params![retry_count, error, now, token.as_str()],
        )?;
        if n == 0 {
            warn!(retry_count, "retry transition not applied");
            return Ok(false);
        }
        append_event(&tx, token, ExecutionStatus::Retry, retry_count, Some(error), &now)?;
        tx.commit()?;
        info!(retry_count, error, "execution scheduled for retry");
        Ok(true)
    }

    /// PENDING -> SUCCESS with the payload attached to the same row.
    #[instrument(skip(self, payload), fields(token = %token, rows = payload.rows.len()))]
    pub fn mark_success(&self, token: &ExecutionToken, payload: &QueryPayload) -> Result<bool> {
        let result = serde_json::to_string(payload)?;
        let mut db = self.db.lock().expect("ledger db mutex poisoned");
        let tx = db.transaction()?;
        let now = timestamp(Utc::now());
        let n = tx.execute(
            "UPDATE executions
             SET status = 'SUCCESS', result = ?1, error_message = NULL, updated_at = ?2
             WHERE token = ?3 AND status = 'PENDING'",
            rusqlite::params![result, now, token.as_str()],
        )?;
        if n == 0 {
            warn!("success transition not applied");
            return Ok(false);
        }
        let retry_count = current_retry_count(&tx, token)?;
        append_event(&tx, token, ExecutionStatus::Success, retry_count, None, &now)?;
        tx.commit()?;
        info!("execution succeeded");
        Ok(true)
    }

    /// Non-terminal -> FAILURE, keeping `error` verbatim. `retry_count` is
    /// left at its last value.
    #[instrument(skip(self, error), fields(token = %token))]
    pub fn mark_failure(&self, token: &ExecutionToken, error: &str) -> Result<bool> {
        let mut db = self.db.lock().expect("ledger db mutex poisoned");
        let tx = db.transaction()?;
        let now = timestamp(Utc::now());
        let n = tx.execute(
            "UPDATE executions
             SET status = 'FAILURE', error_message = ?1, updated_at = ?2
             WHERE token = ?3 AND status IN ('PENDING', 'RETRY')",
            rusqlite::params![error, now, token.as_str()],
        )?;
        if n == 0 {
            warn!("failure transition not applied");
            return Ok(false);
        }
        let retry_count = current_retry_count(&tx, token)?;
        append_event(&tx, token, ExecutionStatus::Failure, retry_count, Some(error), &now)?;
        tx.commit()?;
        info!(retry_count, error, "execution failed");
        Ok(true)
    }

    pub fn get(&self, token: &ExecutionToken) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().expect("ledger db mutex poisoned");
        get_record(&db, token)
    }

    /// Records matching `filter`, most recently updated first.
    pub fn list(&self, filter: &LedgerFilter) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().expect("ledger db mutex poisoned");
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR task_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY updated_at DESC, id DESC
             LIMIT ?3"
        ))?;
        let limit = filter.limit.unwrap_or(LedgerFilter::DEFAULT_LIMIT) as i64;
        let rows = stmt.query_map(
            rusqlite::params![filter.task_id, filter.status.map(|s| s.as_str()), limit],
            row_to_record,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Non-terminal records, oldest first. Used on startup to pick up
    /// executions a previous process left PENDING or RETRY.
    pub fn unfinished(&self) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().expect("ledger db mutex poisoned");
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS} WHERE status IN ('PENDING', 'RETRY') ORDER BY id"
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Every transition recorded for `token`, oldest first.
    pub fn history(&self, token: &ExecutionToken) -> Result<Vec<ExecutionEvent>> {
        let db = self.db.lock().expect("ledger db mutex poisoned");
        let mut stmt = db.prepare(
            "SELECT id, token, status, retry_count, detail, recorded_at
             FROM execution_events WHERE token = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([token.as_str()], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// --- private helpers -------------------------------------------------------

fn get_record(conn: &Connection, token: &ExecutionToken) -> Result<Option<ExecutionRecord>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE token = ?1"),
            [token.as_str()],
            row_to_record,
        )
        .optional()?;
    Ok(row)
}

fn current_retry_count(conn: &Connection, token: &ExecutionToken) -> Result<u32> {
    let n: u32 = conn.query_row(
        "SELECT retry_count FROM executions WHERE token = ?1",
        [token.as_str()],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn append_event(
    conn: &Connection,
    token: &ExecutionToken,
    status: ExecutionStatus,
    retry_count: u32,
    detail: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO execution_events (token, status, retry_count, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![token.as_str(), status.as_str(), retry_count, detail, now],
    )?;
    Ok(())
}

fn parse_status(idx: usize, s: &str) -> rusqlite::Result<ExecutionStatus> {
    s.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let token: String = row.get(1)?;
    let status: String = row.get(3)?;
    let result: Option<String> = row.get(5)?;
    let result = match result {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    Ok(ExecutionRecord {
        id: row.get(0)?,
        token: ExecutionToken(token),
        task_id: row.get(2)?,
        status: parse_status(3, &status)?,
        retry_count: row.get(4)?,
        result,
        error_message: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionEvent> {
    let token: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(ExecutionEvent {
        id: row.get(0)?,
        token: ExecutionToken(token),
        status: parse_status(2, &status)?,
        retry_count: row.get(3)?,
        detail: row.get(4)?,
        recorded_at: row.get(5)?,
    })
}
