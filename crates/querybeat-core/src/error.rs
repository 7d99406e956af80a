use thiserror::Error;

/// Structural defects in a task definition. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid cron expression '{expression}': expected 5 fields, found {found}")]
    MalformedCron { expression: String, found: usize },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("query is empty")]
    EmptyQuery,

    #[error("query is not a read-only statement: it must begin with SELECT")]
    NotReadOnly,

    #[error("query contains more than one statement")]
    MultipleStatements,
}

impl ValidationError {
    /// Short error code string, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MalformedCron { .. } => "MALFORMED_CRON",
            ValidationError::InvalidCron { .. } => "INVALID_CRON",
            ValidationError::EmptyQuery => "EMPTY_QUERY",
            ValidationError::NotReadOnly => "NOT_READ_ONLY",
            ValidationError::MultipleStatements => "MULTIPLE_STATEMENTS",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
