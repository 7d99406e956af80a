use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of a task row in the catalog.
pub type TaskId = i64;

/// Primary key of a connection row in the catalog.
pub type ConnectionId = i64;

/// Canonical timestamp encoding used by every table.
///
/// Fixed-width RFC 3339 in UTC with millisecond precision, so SQLite can
/// order and compare the strings lexicographically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp written by [`timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// An externally described data source. Tasks refer to it by id only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: ConnectionId,
    /// Unique human-readable label.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
}

// Hand-written so credentials never reach a log line.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Input for creating or updating a connection row.
#[derive(Clone, Serialize, Deserialize)]
pub struct NewConnection {
    pub name: String,
    pub host: String,
    /// Defaults to the PostgreSQL port when omitted.
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for NewConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewConnection")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn default_pg_port() -> u16 {
    5432
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Bounded retry behaviour attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-attempts allowed after the first failure. 0 disables retries.
    pub max_retries: u32,
    /// Delay before each re-attempt, in milliseconds.
    pub retry_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay_ms: delay.as_millis() as u64,
        }
    }

    /// A policy that finalizes on the first recoverable failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// A persisted task: a read-only query bound to a schedule and a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub name: String,
    /// The query text, validated as read-only before every attempt.
    pub query: String,
    /// Five-field cron expression.
    pub schedule: String,
    pub is_active: bool,
    /// Non-owning reference to a [`ConnectionConfig`].
    pub connection_id: ConnectionId,
    pub retry: RetryPolicy,
    /// Timestamp of the most recent admitted attempt, if any.
    pub last_run: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for [`TaskDefinition`] creation and update.
///
/// `id: None` creates a new row; `Some(id)` replaces the existing one.
/// `retry: None` falls back to the configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    #[serde(default)]
    pub id: Option<TaskId>,
    pub name: String,
    pub query: String,
    pub schedule: String,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl TaskDraft {
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        schedule: impl Into<String>,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            query: query.into(),
            schedule: schedule.into(),
            is_active: true,
            connection_id,
            retry: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

impl From<&TaskDefinition> for TaskDraft {
    fn from(task: &TaskDefinition) -> Self {
        Self {
            id: Some(task.id),
            name: task.name.clone(),
            query: task.query.clone(),
            schedule: task.schedule.clone(),
            is_active: task.is_active,
            connection_id: task.connection_id,
            retry: Some(task.retry),
        }
    }
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// Idempotency key of one logical execution, reused across its retries.
///
/// UUIDv7 so tokens sort by creation time in logs and in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionToken(pub String);

impl ExecutionToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExecutionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Attempt admitted, not yet resolved.
    Pending,
    /// A recoverable failure occurred; a re-attempt is scheduled.
    Retry,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Retry => "RETRY",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RETRY" => Ok(ExecutionStatus::Retry),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILURE" => Ok(ExecutionStatus::Failure),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Columns and rows captured from a successful query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Message from the dispatcher (or a manual run) to the worker pool.
///
/// Carries identifiers only: the worker reloads the task and its connection
/// when the attempt starts, so a queued request never acts on stale config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    /// `None` for a fresh scheduled fire; the worker mints a token on admission.
    pub token: Option<ExecutionToken>,
}

impl ExecutionRequest {
    pub fn scheduled(task_id: TaskId) -> Self {
        Self {
            task_id,
            token: None,
        }
    }

    pub fn with_token(task_id: TaskId, token: ExecutionToken) -> Self {
        Self {
            task_id,
            token: Some(token),
        }
    }
}
