use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use querybeat_core::query::is_plain_identifier;
use querybeat_core::types::timestamp;
use querybeat_core::{ExecutionToken, QueryPayload, TaskId};
use rusqlite::types::Type;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::{LedgerError, Result};
use crate::types::SinkRow;

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination table for successful query outputs.
///
/// The table is created on first use with `CREATE TABLE IF NOT EXISTS`, which
/// SQLite serialises across connections, so racing first writers all succeed.
/// Rows are keyed by execution token: a redelivered attempt never appends a
/// second row.
pub struct ResultsSink {
    db: Mutex<Connection>,
    table: String,
    provisioned: AtomicBool,
}

impl ResultsSink {
    pub fn new(conn: Connection, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_plain_identifier(&table) {
            return Err(LedgerError::InvalidTableName { name: table });
        }
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            db: Mutex::new(conn),
            table,
            provisioned: AtomicBool::new(false),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the sink table if it does not exist yet. Idempotent and safe
    /// to call from any number of workers or processes at once.
    pub fn ensure_table(&self) -> Result<()> {
        if self.provisioned.load(Ordering::Acquire) {
            return Ok(());
        }
        let db = self.db.lock().expect("sink db mutex poisoned");
        db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id          INTEGER NOT NULL,
                execution_token  TEXT    NOT NULL UNIQUE,
                execution_time   TEXT    NOT NULL,
                status           TEXT    NOT NULL DEFAULT 'SUCCESS',
                result_data      TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_task
                ON {table}(task_id, execution_time DESC);",
            table = self.table
        ))?;
        if !self.provisioned.swap(true, Ordering::AcqRel) {
            info!(table = %self.table, "results sink table ready");
        }
        Ok(())
    }

    /// Persist one successful result. Returns `false` when a row for `token`
    /// was already written.
    #[instrument(skip(self, payload), fields(table = %self.table, rows = payload.rows.len()))]
    pub fn write(
        &self,
        task_id: TaskId,
        token: &ExecutionToken,
        payload: &QueryPayload,
    ) -> Result<bool> {
        self.ensure_table()?;
        let data = serde_json::to_string(payload)?;
        let db = self.db.lock().expect("sink db mutex poisoned");
        let n = db.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (task_id, execution_token, execution_time, status, result_data)
                 VALUES (?1, ?2, ?3, 'SUCCESS', ?4)",
                self.table
            ),
            rusqlite::params![task_id, token.as_str(), timestamp(Utc::now()), data],
        )?;
        if n == 0 {
            debug!(token = %token, "result already persisted");
        }
        Ok(n == 1)
    }

    /// Stored results for a task, newest first.
    pub fn results_for(&self, task_id: TaskId, limit: usize) -> Result<Vec<SinkRow>> {
        self.ensure_table()?;
        let db = self.db.lock().expect("sink db mutex poisoned");
        let mut stmt = db.prepare(&format!(
            "SELECT task_id, execution_token, execution_time, status, result_data
             FROM {} WHERE task_id = ?1
             ORDER BY execution_time DESC, id DESC LIMIT ?2",
            self.table
        ))?;
        let rows = stmt.query_map(rusqlite::params![task_id, limit as i64], row_to_sink_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_sink_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SinkRow> {
    let token: String = row.get(1)?;
    let data: String = row.get(4)?;
    let result_data = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(SinkRow {
        task_id: row.get(0)?,
        execution_token: ExecutionToken(token),
        execution_time: row.get(2)?,
        status: row.get(3)?,
        result_data,
    })
}
