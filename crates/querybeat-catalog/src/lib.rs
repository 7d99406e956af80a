//! `querybeat-catalog`: SQLite store for task and connection definitions.
//!
//! The catalog stands in for the management layer that owns these rows.
//! Task writes are exposed as free functions over a borrowed
//! [`rusqlite::Connection`] so the schedule registry can run them inside the
//! same transaction as its trigger writes.

pub mod connections;
pub mod db;
pub mod error;
pub mod manager;
pub mod tasks;

pub use error::{CatalogError, Result};
pub use manager::CatalogManager;
