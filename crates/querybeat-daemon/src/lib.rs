//! `querybeat-daemon`: wires the scheduler, worker pool, ledger and sink
//! into one running [`Engine`], and ships the `querybeat` binary.

pub mod engine;
pub mod error;

pub use engine::{open_db, Engine};
pub use error::{EngineError, Result};
