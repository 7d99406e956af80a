use querybeat_core::{TaskId, ValidationError};
use thiserror::Error;

/// Everything that can end an execution attempt.
///
/// [`is_recoverable`](ExecutionError::is_recoverable) splits the variants
/// into the ones the retry policy applies to and the ones that finalize
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Structural defect in the task. Never retried.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The source could not be reached or rejected the credentials.
    #[error("connection error: {0}")]
    Connection(String),

    /// The attempt exceeded its time budget; the connection was closed.
    #[error("connection error: attempt timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("query execution error: {0}")]
    QueryExecution(String),

    /// The result could not be persisted; the record is not marked SUCCESS.
    #[error("sink write error: {0}")]
    SinkWrite(String),

    #[error("max retries exceeded after {retries} retries: {last_error}")]
    MaxRetriesExceeded { retries: u32, last_error: String },

    #[error("Task with ID {id} does not exist.")]
    TaskNotFound { id: TaskId },
}

impl ExecutionError {
    /// True for failures the task's retry policy applies to.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Connection(_)
                | ExecutionError::Timeout { .. }
                | ExecutionError::QueryExecution(_)
                | ExecutionError::SinkWrite(_)
        )
    }

    /// Short error code string, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::Validation(_) => "VALIDATION_ERROR",
            ExecutionError::Connection(_) => "CONNECTION_ERROR",
            ExecutionError::Timeout { .. } => "CONNECTION_TIMEOUT",
            ExecutionError::QueryExecution(_) => "QUERY_EXECUTION_ERROR",
            ExecutionError::SinkWrite(_) => "SINK_WRITE_ERROR",
            ExecutionError::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            ExecutionError::TaskNotFound { .. } => "TASK_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
