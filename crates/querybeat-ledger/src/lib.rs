//! `querybeat-ledger`: execution lifecycle records and the results sink.
//!
//! Both live in the shared SQLite file. The [`ExecutionLedger`] keeps one
//! row per execution token plus an append-only transition trail; the
//! [`ResultsSink`] stores the payload of every successful execution in a
//! lazily created destination table.

pub mod db;
pub mod error;
pub mod ledger;
pub mod sink;
pub mod types;

pub use error::{LedgerError, Result};
pub use ledger::ExecutionLedger;
pub use sink::ResultsSink;
pub use types::{ExecutionEvent, ExecutionRecord, LedgerFilter, SinkRow};
