use querybeat_catalog::CatalogError;
use querybeat_core::{TaskId, ValidationError};
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The task definition failed structural validation (e.g. malformed cron).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Catalog error: {0}")]
    Catalog(CatalogError),
}

impl From<CatalogError> for SchedulerError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::TaskNotFound { id } => SchedulerError::TaskNotFound { id },
            CatalogError::Database(db) => SchedulerError::Database(db),
            other => SchedulerError::Catalog(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
