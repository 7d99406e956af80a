use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use querybeat_core::types::timestamp;
use querybeat_core::ExecutionRequest;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{cron::CronSchedule, db::init_db, error::Result, triggers, types::Trigger};

/// Clock loop that turns due triggers into execution requests.
///
/// Reads the trigger table on every tick, so registry writes take effect
/// without a restart. Requests carry the task id only.
pub struct TriggerDispatcher {
    conn: Connection,
    tz: Tz,
    tick: Duration,
    requests: mpsc::Sender<ExecutionRequest>,
}

impl TriggerDispatcher {
    pub fn new(
        conn: Connection,
        tz: Tz,
        tick: Duration,
        requests: mpsc::Sender<ExecutionRequest>,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn,
            tz,
            tick,
            requests,
        })
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true` or the
    /// worker side of the queue goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "trigger dispatcher started");
        match self.advance_missed_on_startup(Utc::now()) {
            Ok(n) if n > 0 => warn!(count = n, "missed trigger windows skipped on startup"),
            Err(e) => error!("missed-on-startup query failed: {e}"),
            _ => {}
        }

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let fired = match self.tick_at(Utc::now()) {
                        Ok(fired) => fired,
                        Err(e) => {
                            error!("dispatcher tick error: {e}");
                            continue;
                        }
                    };
                    for request in fired {
                        let task_id = request.task_id;
                        if self.requests.send(request).await.is_err() {
                            warn!(task_id, "execution queue closed; dispatcher stopping");
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("trigger dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim every trigger due at `now` and return one request per claim.
    ///
    /// The next slot is computed strictly after `now`, and the claim is a
    /// compare-and-set on the stored `next_fire`, so a slot fires at most
    /// once however ticks and slots line up.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<Vec<ExecutionRequest>> {
        let now_str = timestamp(now);
        let due = triggers::due(&self.conn, &now_str)?;

        let mut fired = Vec::with_capacity(due.len());
        for trigger in due {
            let Some(expected) = trigger.next_fire.as_deref() else {
                continue;
            };
            let next = match self.next_slot(&trigger, now) {
                Some(next) => next,
                None => continue,
            };
            if triggers::advance(
                &self.conn,
                trigger.task_id,
                expected,
                next.as_deref(),
                Some(&now_str),
                &now_str,
            )? {
                debug!(
                    task_id = trigger.task_id,
                    label = %trigger.label,
                    next_fire = next.as_deref().unwrap_or("-"),
                    "trigger fired"
                );
                fired.push(ExecutionRequest::scheduled(trigger.task_id));
            }
        }
        Ok(fired)
    }

    /// Move triggers whose slot passed while the process was down to their
    /// next future slot, without firing them. Returns how many moved.
    pub fn advance_missed_on_startup(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let now_str = timestamp(now);
        let mut skipped = 0;
        for trigger in triggers::due(&self.conn, &now_str)? {
            // exactly due now is not missed
            if trigger.next_fire.as_deref() == Some(now_str.as_str()) {
                continue;
            }
            let Some(expected) = trigger.next_fire.as_deref() else {
                continue;
            };
            let Some(next) = self.next_slot(&trigger, now) else {
                continue;
            };
            if triggers::advance(
                &self.conn,
                trigger.task_id,
                expected,
                next.as_deref(),
                None,
                &now_str,
            )? {
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    // --- private helpers ---------------------------------------------------

    /// `Some(next_fire)` to store after `now`; `None` when the stored fields
    /// no longer parse, which leaves the trigger as it is.
    fn next_slot(&self, trigger: &Trigger, now: DateTime<Utc>) -> Option<Option<String>> {
        match CronSchedule::from_fields(trigger.fields.clone()) {
            Ok(schedule) => Some(schedule.next_after(now, &self.tz).map(timestamp)),
            Err(e) => {
                error!(task_id = trigger.task_id, "stored trigger does not parse: {e}");
                None
            }
        }
    }
}
