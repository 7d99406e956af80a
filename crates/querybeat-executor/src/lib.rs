//! `querybeat-executor`: runs execution attempts against external sources.
//!
//! A [`WorkerPool`] pulls [`ExecutionRequest`](querybeat_core::ExecutionRequest)s
//! off a bounded queue and hands each one to an [`ExecutionWorker`], which
//! opens a connection through the [`ConnectionBroker`], writes the result to
//! the sink and records the outcome in the ledger. Recoverable failures go
//! back onto the queue after the task's retry delay.

pub mod broker;
pub mod error;
pub mod postgres;
pub mod retry;
pub mod worker;

pub use broker::{ConnectionBroker, Connector, SourceConnection};
pub use error::{ExecutionError, Result};
pub use postgres::PgConnector;
pub use retry::{AttemptOutcome, RetryController, RetryDecision};
pub use worker::{AttemptReport, ExecutionWorker, WorkerPool};
