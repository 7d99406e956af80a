use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use querybeat_catalog::tasks;
use querybeat_core::types::timestamp;
use querybeat_core::{RetryPolicy, TaskDefinition, TaskDraft, TaskId};
use rusqlite::Connection;
use tracing::{info, instrument};

use crate::{
    cron::CronSchedule,
    db::init_db,
    error::{Result, SchedulerError},
    triggers,
    types::Trigger,
};

/// Owner of the live trigger set.
///
/// Every write goes through here so a task row and its trigger always change
/// in one SQLite transaction. Uses its own `Connection`; the dispatcher reads
/// the same tables through another.
pub struct ScheduleRegistry {
    db: Mutex<Connection>,
    tz: Tz,
    default_retry: RetryPolicy,
}

impl ScheduleRegistry {
    /// Create the registry, initialising the catalog and trigger schema.
    ///
    /// `default_retry` applies to drafts that carry no retry policy.
    pub fn new(conn: Connection, tz: Tz, default_retry: RetryPolicy) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            tz,
            default_retry,
        })
    }

    /// Create or replace a task and its trigger.
    ///
    /// The cron expression is parsed before anything is written; a malformed
    /// expression leaves both the task and the live trigger untouched.
    #[instrument(skip(self, draft), fields(task_id = ?draft.id, name = %draft.name))]
    pub fn upsert(&self, draft: &TaskDraft) -> Result<TaskDefinition> {
        self.upsert_at(draft, Utc::now())
    }

    /// [`upsert`](Self::upsert) with an explicit clock, for the first
    /// next-fire computation.
    pub fn upsert_at(&self, draft: &TaskDraft, now: DateTime<Utc>) -> Result<TaskDefinition> {
        let schedule = CronSchedule::parse(&draft.schedule)?;

        let mut db = self.db.lock().expect("registry db mutex poisoned");
        let tx = db.transaction()?;
        let task = tasks::upsert(&tx, draft, self.default_retry)?;

        let now_str = timestamp(now);
        let next_fire = if task.is_active {
            // an edit that leaves the schedule alone must not skip a due slot
            let pending = triggers::get(&tx, task.id)?
                .filter(|t| t.enabled && t.fields == *schedule.fields())
                .and_then(|t| t.next_fire)
                .filter(|next| next.as_str() <= now_str.as_str());
            pending.or_else(|| schedule.next_after(now, &self.tz).map(timestamp))
        } else {
            None
        };
        triggers::upsert(
            &tx,
            task.id,
            &Trigger::label_for(task.id, &task.name),
            schedule.fields(),
            task.is_active,
            next_fire.as_deref(),
            &now_str,
        )?;
        tx.commit()?;

        info!(
            task_id = task.id,
            active = task.is_active,
            next_fire = next_fire.as_deref().unwrap_or("-"),
            "trigger registered"
        );
        Ok(task)
    }

    /// Enable or disable a task's trigger without touching anything else.
    ///
    /// Re-enabling schedules from the next slot after now; slots that passed
    /// while disabled are not fired.
    #[instrument(skip(self))]
    pub fn set_active(&self, task_id: TaskId, is_active: bool) -> Result<TaskDefinition> {
        let now = Utc::now();
        let mut db = self.db.lock().expect("registry db mutex poisoned");
        let tx = db.transaction()?;
        let task = tasks::set_active(&tx, task_id, is_active)?;

        let schedule = CronSchedule::parse(&task.schedule)?;
        let next_fire = if is_active {
            schedule.next_after(now, &self.tz).map(timestamp)
        } else {
            None
        };
        let now_str = timestamp(now);
        if triggers::set_enabled(&tx, task_id, is_active, next_fire.as_deref(), &now_str)? == 0 {
            // task rows written outside the registry have no trigger yet
            triggers::upsert(
                &tx,
                task.id,
                &Trigger::label_for(task.id, &task.name),
                schedule.fields(),
                is_active,
                next_fire.as_deref(),
                &now_str,
            )?;
        }
        tx.commit()?;

        info!(task_id, active = is_active, "trigger toggled");
        Ok(task)
    }

    /// Delete a task together with its trigger. Both go or neither does.
    #[instrument(skip(self))]
    pub fn remove(&self, task_id: TaskId) -> Result<()> {
        let mut db = self.db.lock().expect("registry db mutex poisoned");
        let tx = db.transaction()?;
        triggers::delete(&tx, task_id)?;
        tasks::delete(&tx, task_id)?;
        tx.commit()?;
        info!(task_id, "task and trigger removed");
        Ok(())
    }

    pub fn get_trigger(&self, task_id: TaskId) -> Result<Option<Trigger>> {
        let db = self.db.lock().expect("registry db mutex poisoned");
        triggers::get(&db, task_id)
    }

    pub fn list_triggers(&self) -> Result<Vec<Trigger>> {
        let db = self.db.lock().expect("registry db mutex poisoned");
        triggers::list(&db)
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<TaskDefinition> {
        let db = self.db.lock().expect("registry db mutex poisoned");
        tasks::get(&db, task_id)?.ok_or(SchedulerError::TaskNotFound { id: task_id })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}
