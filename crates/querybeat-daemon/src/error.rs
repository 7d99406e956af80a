use querybeat_catalog::CatalogError;
use querybeat_core::ConfigError;
use querybeat_ledger::LedgerError;
use querybeat_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker pool is gone; nothing can be enqueued any more.
    #[error("execution queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
