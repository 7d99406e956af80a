use querybeat_core::TaskId;
use serde::{Deserialize, Serialize};

use crate::cron::CronFields;

/// The recurring schedule derived from one task.
///
/// Owned by the task's row: rewritten on every upsert, disabled with the
/// task and deleted with it. Refers back to the task by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub task_id: TaskId,
    /// Display name, `Task {id}: {name}`.
    pub label: String,
    pub fields: CronFields,
    pub enabled: bool,
    /// Next slot the dispatcher will fire. `None` while disabled.
    pub next_fire: Option<String>,
    pub last_fired: Option<String>,
    pub updated_at: String,
}

impl Trigger {
    pub fn label_for(task_id: TaskId, name: &str) -> String {
        format!("Task {task_id}: {name}")
    }
}
