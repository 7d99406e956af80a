use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use querybeat_catalog::{CatalogError, CatalogManager};
use querybeat_core::query::ensure_read_only;
use querybeat_core::{
    ConnectionConfig, ExecutionRequest, ExecutionStatus, ExecutionToken, TaskDefinition, TaskId,
};
use querybeat_ledger::{ExecutionLedger, LedgerError, ResultsSink};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::broker::ConnectionBroker;
use crate::error::ExecutionError;
use crate::retry::{AttemptOutcome, RetryController, RetryDecision};

/// What one call to [`ExecutionWorker::execute`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub token: ExecutionToken,
    pub task_id: TaskId,
    /// Status the record was left in.
    pub status: ExecutionStatus,
    /// Set when the execution must run again after this delay.
    pub retry_after: Option<Duration>,
    /// False when the record was already terminal and nothing ran.
    pub ran: bool,
}

/// Runs a single attempt end-to-end:
/// admit, load, validate, connect, query, sink, record.
pub struct ExecutionWorker {
    catalog: Arc<CatalogManager>,
    ledger: Arc<ExecutionLedger>,
    sink: Arc<ResultsSink>,
    broker: ConnectionBroker,
}

impl ExecutionWorker {
    pub fn new(
        catalog: Arc<CatalogManager>,
        ledger: Arc<ExecutionLedger>,
        sink: Arc<ResultsSink>,
        broker: ConnectionBroker,
    ) -> Self {
        Self {
            catalog,
            ledger,
            sink,
            broker,
        }
    }

    /// Execute one attempt for `request`.
    ///
    /// The only error is a failed admission: without a ledger row the attempt
    /// does not run. Later ledger writes are best-effort and only logged.
    #[instrument(skip(self, request), fields(task_id = request.task_id))]
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<AttemptReport, LedgerError> {
        let task_id = request.task_id;
        let token = request.token.unwrap_or_default();

        let record = self.ledger.admit(&token, task_id)?;
        if record.status.is_terminal() {
            debug!(token = %token, status = %record.status, "execution already finished");
            return Ok(AttemptReport {
                token,
                task_id,
                status: record.status,
                retry_after: None,
                ran: false,
            });
        }

        // fresh read: a queued request never acts on stale task or source config
        let (task, source) = match self.catalog.load_for_execution(task_id) {
            Ok(Some(loaded)) => loaded,
            Ok(None) | Err(CatalogError::ConnectionNotFound { .. }) => {
                let err = ExecutionError::TaskNotFound { id: task_id };
                warn!(token = %token, "{err}");
                return Ok(self.finalize(token, task_id, &err.to_string()));
            }
            Err(e) => {
                error!(token = %token, error = %e, "catalog read failed");
                return Ok(self.finalize(token, task_id, &format!("catalog error: {e}")));
            }
        };
        if let Err(e) = self.catalog.touch_last_run(task_id, Utc::now()) {
            warn!(error = %e, "could not stamp last_run");
        }

        info!(
            token = %token,
            task = %task.name,
            source = %source.name,
            retry_count = record.retry_count,
            "attempt started"
        );

        match self.attempt(&task, &source, &token).await {
            AttemptOutcome::Success(payload) => {
                if let Err(e) = self.ledger.mark_success(&token, &payload) {
                    error!(token = %token, error = %e, "ledger write failed");
                }
                Ok(AttemptReport {
                    token,
                    task_id,
                    status: ExecutionStatus::Success,
                    retry_after: None,
                    ran: true,
                })
            }
            AttemptOutcome::Failure(err) => {
                warn!(token = %token, code = err.code(), error = %err, "attempt failed permanently");
                Ok(self.finalize(token, task_id, &err.to_string()))
            }
            AttemptOutcome::Retry(err) => {
                match RetryController::decide(&task.retry, record.retry_count) {
                    RetryDecision::Reenqueue { retry_count, delay } => {
                        let applied = self
                            .ledger
                            .mark_retry(&token, retry_count, &err.to_string())
                            .unwrap_or_else(|e| {
                                error!(token = %token, error = %e, "ledger write failed");
                                false
                            });
                        Ok(AttemptReport {
                            token,
                            task_id,
                            status: ExecutionStatus::Retry,
                            retry_after: applied.then_some(delay),
                            ran: true,
                        })
                    }
                    RetryDecision::Finalize => {
                        let exceeded = ExecutionError::MaxRetriesExceeded {
                            retries: record.retry_count,
                            last_error: err.to_string(),
                        };
                        warn!(token = %token, code = exceeded.code(), "{exceeded}");
                        // the record keeps the underlying error verbatim
                        Ok(self.finalize(token, task_id, &err.to_string()))
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    async fn attempt(
        &self,
        task: &TaskDefinition,
        source: &ConnectionConfig,
        token: &ExecutionToken,
    ) -> AttemptOutcome {
        // structural: checked before any connection is opened
        if let Err(e) = ensure_read_only(&task.query) {
            return AttemptOutcome::Failure(e.into());
        }

        let payload = match self.broker.run_query(source, &task.query).await {
            Ok(payload) => payload,
            Err(e) => return AttemptOutcome::from(Err(e)),
        };

        // the sink row must exist before the record can say SUCCESS
        if let Err(e) = self.sink.write(task.id, token, &payload) {
            return AttemptOutcome::Retry(ExecutionError::SinkWrite(e.to_string()));
        }
        AttemptOutcome::Success(payload)
    }

    fn finalize(&self, token: ExecutionToken, task_id: TaskId, error: &str) -> AttemptReport {
        if let Err(e) = self.ledger.mark_failure(&token, error) {
            error!(token = %token, error = %e, "ledger write failed");
        }
        AttemptReport {
            token,
            task_id,
            status: ExecutionStatus::Failure,
            retry_after: None,
            ran: true,
        }
    }
}

/// Bounded set of execution slots fed by an mpsc queue.
///
/// Each request takes a semaphore permit and runs on its own Tokio task.
/// Retries are delayed re-sends onto the same queue. A token already
/// running is not started twice.
pub struct WorkerPool {
    worker: Arc<ExecutionWorker>,
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    in_flight: Arc<Mutex<HashSet<ExecutionToken>>>,
    tx: mpsc::Sender<ExecutionRequest>,
    rx: mpsc::Receiver<ExecutionRequest>,
}

impl WorkerPool {
    pub fn new(worker: ExecutionWorker, max_concurrency: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let max_concurrency = max_concurrency.max(1);
        Self {
            worker: Arc::new(worker),
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tx,
            rx,
        }
    }

    /// Queue handle for the dispatcher and manual runs.
    pub fn sender(&self) -> mpsc::Sender<ExecutionRequest> {
        self.tx.clone()
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`, then waits for
    /// attempts already running. Delayed retries still pending are dropped;
    /// their records stay in RETRY.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(slots = self.max_concurrency, "worker pool started");
        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let request = tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            self.spawn_attempt(request, permit);
        }

        info!("worker pool draining");
        let _ = self.slots.acquire_many(self.max_concurrency as u32).await;
        info!("worker pool stopped");
    }

    // --- private helpers ---------------------------------------------------

    fn spawn_attempt(&self, request: ExecutionRequest, permit: OwnedSemaphorePermit) {
        let task_id = request.task_id;
        let token = request.token.unwrap_or_default();
        let Some(guard) = InFlight::claim(&self.in_flight, &token) else {
            debug!(task_id, token = %token, "execution already running; duplicate dropped");
            return;
        };

        let worker = Arc::clone(&self.worker);
        let requeue = self.tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let report = worker
                .execute(ExecutionRequest::with_token(task_id, token))
                .await;
            drop(guard);
            match report {
                Ok(AttemptReport {
                    token,
                    retry_after: Some(delay),
                    ..
                }) => schedule_retry(requeue, ExecutionRequest::with_token(task_id, token), delay),
                Ok(_) => {}
                Err(e) => error!(task_id, error = %e, "execution could not be admitted"),
            }
        });
    }
}

/// Re-send `request` after `delay` without holding a slot meanwhile.
fn schedule_retry(tx: mpsc::Sender<ExecutionRequest>, request: ExecutionRequest, delay: Duration) {
    debug!(task_id = request.task_id, delay_ms = delay.as_millis() as u64, "retry scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let task_id = request.task_id;
        if tx.send(request).await.is_err() {
            warn!(task_id, "execution queue closed; retry dropped");
        }
    });
}

/// Marks a token as running until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<ExecutionToken>>>,
    token: ExecutionToken,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<ExecutionToken>>>, token: &ExecutionToken) -> Option<Self> {
        let inserted = set
            .lock()
            .expect("in-flight set mutex poisoned")
            .insert(token.clone());
        inserted.then(|| Self {
            set: Arc::clone(set),
            token: token.clone(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.token);
        }
    }
}
