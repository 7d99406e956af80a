//! `querybeat-core`: types, validation and configuration shared by every
//! querybeat crate.

pub mod config;
pub mod error;
pub mod query;
pub mod types;

pub use config::QuerybeatConfig;
pub use error::{ConfigError, ValidationError};
pub use types::{
    ConnectionConfig, ConnectionId, ExecutionRequest, ExecutionStatus, ExecutionToken,
    NewConnection, QueryPayload, RetryPolicy, TaskDefinition, TaskDraft, TaskId,
};
