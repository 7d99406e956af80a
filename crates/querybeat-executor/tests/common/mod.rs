#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use querybeat_catalog::{connections, tasks, CatalogManager};
use querybeat_core::{
    ConnectionConfig, ConnectionId, NewConnection, QueryPayload, RetryPolicy, TaskDraft, TaskId,
};
use querybeat_executor::{
    ConnectionBroker, Connector, ExecutionError, ExecutionWorker, SourceConnection,
};
use querybeat_ledger::{ExecutionLedger, ResultsSink};
use rusqlite::Connection;
use tempfile::TempDir;

pub const SINK_TABLE: &str = "query_results";

/// What the fake source does for one connection.
#[derive(Debug, Clone)]
pub enum Step {
    /// Connect and answer with the `SELECT 1 AS x` payload.
    Rows,
    /// Answer after a delay.
    Slow(Duration),
    /// Refuse the connection.
    Refuse,
    /// Connect, then fail the query.
    QueryFails,
    /// Connect, then never answer.
    Hang,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub refused: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Stats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scripted stand-in for a Postgres source. Steps are consumed one per
/// connect; once the script runs out every connect uses `fallback`.
pub struct FakeConnector {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    pub stats: Arc<Stats>,
}

impl FakeConnector {
    pub fn always(step: Step) -> Self {
        Self::scripted(Vec::new(), step)
    }

    pub fn scripted(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback,
            stats: Arc::new(Stats::default()),
        }
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> querybeat_executor::Result<Box<dyn SourceConnection>> {
        let step = self.next_step();
        if matches!(step, Step::Refuse) {
            self.stats.refused.fetch_add(1, Ordering::SeqCst);
            return Err(ExecutionError::Connection(format!(
                "{}:{}: connection refused",
                config.host, config.port
            )));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            step,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct FakeConnection {
    step: Step,
    stats: Arc<Stats>,
}

#[async_trait]
impl SourceConnection for FakeConnection {
    async fn fetch(&mut self, _query: &str) -> querybeat_executor::Result<QueryPayload> {
        match &self.step {
            Step::Rows => Ok(select_one()),
            Step::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(select_one())
            }
            Step::QueryFails => Err(ExecutionError::QueryExecution(
                "relation \"missing\" does not exist".into(),
            )),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(select_one())
            }
            Step::Refuse => unreachable!("refused connections are never handed out"),
        }
    }

    async fn close(self: Box<Self>) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn select_one() -> QueryPayload {
    QueryPayload {
        columns: vec!["x".into()],
        rows: vec![vec![serde_json::json!(1)]],
    }
}

pub fn open(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
        .unwrap();
    conn
}

/// One SQLite file, one connection per component, one fake source.
pub struct Harness {
    _dir: TempDir,
    pub path: PathBuf,
    pub catalog: Arc<CatalogManager>,
    pub ledger: Arc<ExecutionLedger>,
    pub sink: Arc<ResultsSink>,
    pub connector: Arc<FakeConnector>,
    pub source: ConnectionId,
}

impl Harness {
    pub fn new(connector: FakeConnector) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("querybeat.db");

        let conn = open(&path);
        querybeat_catalog::db::init_db(&conn).unwrap();
        let source = connections::insert(
            &conn,
            &NewConnection {
                name: "warehouse".into(),
                host: "warehouse.internal".into(),
                port: 5432,
                database_name: "sales".into(),
                username: "reporter".into(),
                password: "secret".into(),
            },
        )
        .unwrap()
        .id;

        Self {
            catalog: Arc::new(CatalogManager::new(conn)),
            ledger: Arc::new(ExecutionLedger::new(open(&path)).unwrap()),
            sink: Arc::new(ResultsSink::new(open(&path), SINK_TABLE).unwrap()),
            connector: Arc::new(connector),
            source,
            path,
            _dir: dir,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.connector.stats
    }

    pub fn task(&self, query: &str, retry: RetryPolicy) -> TaskId {
        let draft = TaskDraft::new("report", query, "* * * * *", self.source).with_retry(retry);
        tasks::upsert(&open(&self.path), &draft, RetryPolicy::no_retry())
            .unwrap()
            .id
    }

    pub fn worker(&self, attempt_timeout: Duration) -> ExecutionWorker {
        let connector: Arc<dyn Connector> = self.connector.clone();
        ExecutionWorker::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.ledger),
            Arc::clone(&self.sink),
            ConnectionBroker::new(connector, attempt_timeout),
        )
    }

    /// Make every insert into the sink table fail.
    pub fn take_sink_offline(&self) {
        self.sink.ensure_table().unwrap();
        open(&self.path)
            .execute_batch(&format!(
                "CREATE TRIGGER sink_offline BEFORE INSERT ON {SINK_TABLE}
                 BEGIN SELECT RAISE(ABORT, 'sink offline'); END;"
            ))
            .unwrap();
    }

    pub fn bring_sink_back(&self) {
        open(&self.path)
            .execute_batch("DROP TRIGGER sink_offline;")
            .unwrap();
    }
}
