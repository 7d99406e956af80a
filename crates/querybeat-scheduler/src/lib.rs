//! `querybeat-scheduler`: cron triggers for querybeat tasks, persisted in SQLite.
//!
//! # Overview
//!
//! The [`registry::ScheduleRegistry`] is the only writer of tasks and their
//! triggers: a task row and its `triggers` row are created, replaced and
//! deleted in one transaction. The [`dispatcher::TriggerDispatcher`] polls
//! the `triggers` table on a fixed tick and sends an
//! [`ExecutionRequest`](querybeat_core::ExecutionRequest) for every slot it
//! claims.
//!
//! # Cron expressions
//!
//! | Field        | Values                      |
//! |--------------|-----------------------------|
//! | minute       | 0-59                        |
//! | hour         | 0-23                        |
//! | day-of-month | 1-31                        |
//! | month        | 1-12 or JAN-DEC             |
//! | day-of-week  | 0-7 (0 and 7 = Sunday) or SUN-SAT |
//!
//! Fields are evaluated in the configured timezone. When both day fields are
//! restricted a slot must match both.

pub mod cron;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod triggers;
pub mod types;

pub use dispatcher::TriggerDispatcher;
pub use error::{Result, SchedulerError};
pub use registry::ScheduleRegistry;
pub use types::Trigger;
