use querybeat_core::{ExecutionStatus, ExecutionToken, QueryPayload, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle record of one logical execution, shared by all its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub token: ExecutionToken,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    /// Present once the record reaches SUCCESS.
    pub result: Option<QueryPayload>,
    /// Last error seen; kept verbatim on FAILURE.
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of the transition trail returned by `ExecutionLedger::history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: i64,
    pub token: ExecutionToken,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    pub detail: Option<String>,
    pub recorded_at: String,
}

/// Filter for `ExecutionLedger::list`. Results come back newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub task_id: Option<TaskId>,
    pub status: Option<ExecutionStatus>,
    /// Defaults to [`LedgerFilter::DEFAULT_LIMIT`].
    pub limit: Option<usize>,
}

impl LedgerFilter {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A row of the results sink table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRow {
    pub task_id: TaskId,
    pub execution_token: ExecutionToken,
    pub execution_time: String,
    pub status: String,
    pub result_data: QueryPayload,
}
