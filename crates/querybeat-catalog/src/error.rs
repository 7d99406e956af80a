use querybeat_core::{ConnectionId, TaskId};
use thiserror::Error;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("connection not found: {id}")]
    ConnectionNotFound { id: ConnectionId },

    /// Connection names are unique across the catalog.
    #[error("a connection named '{name}' already exists")]
    DuplicateConnectionName { name: String },

    /// Tasks hold a reference to the connection; it cannot be removed under them.
    #[error("connection {id} is still used by {tasks} task(s)")]
    ConnectionInUse { id: ConnectionId, tasks: usize },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
