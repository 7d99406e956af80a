use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("execution not found: {token}")]
    ExecutionNotFound { token: String },

    /// Sink table names are spliced into DDL, so only plain identifiers pass.
    #[error("invalid sink table name: '{name}'")]
    InvalidTableName { name: String },
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
