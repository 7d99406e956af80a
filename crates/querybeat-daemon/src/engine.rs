use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use querybeat_catalog::CatalogManager;
use querybeat_core::{
    ConfigError, ExecutionRequest, ExecutionToken, QuerybeatConfig, TaskDefinition, TaskDraft,
    TaskId,
};
use querybeat_executor::{ConnectionBroker, Connector, ExecutionWorker, WorkerPool};
use querybeat_ledger::{ExecutionEvent, ExecutionLedger, ExecutionRecord, LedgerFilter, ResultsSink};
use querybeat_scheduler::{ScheduleRegistry, TriggerDispatcher};
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::error::{EngineError, Result};

/// Open a connection to the shared database file.
///
/// Every subsystem gets its own connection; WAL lets them read while
/// another one writes.
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// A running querybeat instance: dispatcher and worker pool in the
/// background, plus the handles callers use to manage tasks and read the
/// ledger.
pub struct Engine {
    config: QuerybeatConfig,
    registry: ScheduleRegistry,
    catalog: Arc<CatalogManager>,
    ledger: Arc<ExecutionLedger>,
    sink: Arc<ResultsSink>,
    requests: mpsc::Sender<ExecutionRequest>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Open the database, run migrations, and spawn the dispatcher and the
    /// worker pool. Executions a previous process left unfinished are
    /// queued again with their original tokens.
    pub async fn start(config: QuerybeatConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let tz: Tz = config.scheduler.timezone.parse().map_err(|_| {
            ConfigError::Invalid(format!("unknown timezone '{}'", config.scheduler.timezone))
        })?;

        // single file for all subsystems
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path)?;
        info!(path = %db_path, "opening SQLite database");

        let db = open_db(&db_path)?;
        querybeat_scheduler::db::init_db(&db)?;
        querybeat_ledger::db::init_db(&db)?;
        info!("database migrations complete");

        let registry = ScheduleRegistry::new(open_db(&db_path)?, tz, config.retry.policy())?;
        let catalog = Arc::new(CatalogManager::new(open_db(&db_path)?));
        let ledger = Arc::new(ExecutionLedger::new(open_db(&db_path)?)?);
        let sink = Arc::new(ResultsSink::new(
            open_db(&db_path)?,
            config.sink.table_name.clone(),
        )?);
        sink.ensure_table()?;

        let broker = ConnectionBroker::new(
            connector,
            Duration::from_secs(config.workers.attempt_timeout_secs),
        );
        let worker = ExecutionWorker::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&sink),
            broker,
        );
        let pool = WorkerPool::new(
            worker,
            config.workers.max_concurrency,
            config.workers.queue_capacity,
        );
        let requests = pool.sender();
        let dispatcher = TriggerDispatcher::new(
            open_db(&db_path)?,
            tz,
            Duration::from_millis(config.scheduler.tick_interval_ms),
            requests.clone(),
        )?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(pool.run(shutdown_rx.clone())),
            tokio::spawn(dispatcher.run(shutdown_rx)),
        ];

        let engine = Self {
            config,
            registry,
            catalog,
            ledger,
            sink,
            requests,
            shutdown_tx,
            tasks,
        };
        engine.recover_unfinished().await?;
        info!(timezone = %tz, "querybeat engine started");
        Ok(engine)
    }

    pub fn config(&self) -> &QuerybeatConfig {
        &self.config
    }

    /// Connection and task catalog.
    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn registry(&self) -> &ScheduleRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &ResultsSink {
        &self.sink
    }

    // --- execution ---------------------------------------------------------

    /// Run `task_id` now, outside its schedule.
    ///
    /// The PENDING record exists before this returns, so the token can be
    /// looked up immediately. A task that does not exist ends as FAILURE.
    #[instrument(skip(self))]
    pub async fn run(&self, task_id: TaskId) -> Result<ExecutionToken> {
        let token = ExecutionToken::new();
        self.ledger.admit(&token, task_id)?;
        self.requests
            .send(ExecutionRequest::with_token(task_id, token.clone()))
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        info!(token = %token, "manual run queued");
        Ok(token)
    }

    /// Records matching `filter`, most recently updated first.
    pub fn executions(&self, filter: &LedgerFilter) -> Result<Vec<ExecutionRecord>> {
        Ok(self.ledger.list(filter)?)
    }

    pub fn execution(&self, token: &ExecutionToken) -> Result<Option<ExecutionRecord>> {
        Ok(self.ledger.get(token)?)
    }

    /// Transition trail of one execution, oldest first.
    pub fn history(&self, token: &ExecutionToken) -> Result<Vec<ExecutionEvent>> {
        Ok(self.ledger.history(token)?)
    }

    /// Poll the ledger until `token` reaches SUCCESS or FAILURE.
    ///
    /// Returns the last record seen when `timeout` runs out first.
    pub async fn wait_for(
        &self,
        token: &ExecutionToken,
        timeout: Duration,
    ) -> Result<Option<ExecutionRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.ledger.get(token)?;
            let finished = record.as_ref().is_some_and(|r| r.status.is_terminal());
            if finished || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // --- task management ---------------------------------------------------

    /// Create or replace a task. The trigger set follows without a restart.
    pub fn upsert_task(&self, draft: &TaskDraft) -> Result<TaskDefinition> {
        Ok(self.registry.upsert(draft)?)
    }

    pub fn set_task_active(&self, task_id: TaskId, is_active: bool) -> Result<TaskDefinition> {
        Ok(self.registry.set_active(task_id, is_active)?)
    }

    pub fn remove_task(&self, task_id: TaskId) -> Result<()> {
        Ok(self.registry.remove(task_id)?)
    }

    /// Stop the dispatcher, let running attempts finish, and wait for both
    /// loops to exit.
    pub async fn shutdown(self) {
        info!("querybeat engine shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("querybeat engine stopped");
    }

    // --- private helpers ---------------------------------------------------

    async fn recover_unfinished(&self) -> Result<()> {
        let unfinished = self.ledger.unfinished()?;
        if unfinished.is_empty() {
            return Ok(());
        }
        warn!(count = unfinished.len(), "re-queueing unfinished executions");
        for record in unfinished {
            self.requests
                .send(ExecutionRequest::with_token(record.task_id, record.token))
                .await
                .map_err(|_| EngineError::QueueClosed)?;
        }
        Ok(())
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
