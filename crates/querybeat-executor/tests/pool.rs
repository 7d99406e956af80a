mod common;

use std::time::Duration;

use common::{FakeConnector, Harness, Step};
use querybeat_core::{ExecutionRequest, ExecutionStatus, ExecutionToken, RetryPolicy};
use querybeat_executor::WorkerPool;
use querybeat_ledger::{ExecutionRecord, LedgerFilter};
use tokio::sync::watch;

/// Poll the ledger until `n` records for `task_id` are terminal.
async fn wait_finished(h: &Harness, task_id: i64, n: usize) -> Vec<ExecutionRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let records = h.ledger.list(&LedgerFilter::for_task(task_id)).unwrap();
        let done = records.iter().filter(|r| r.status.is_terminal()).count();
        if done >= n {
            return records;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {n} finished executions"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn concurrency_is_bounded_by_slots() {
    let h = Harness::new(FakeConnector::always(Step::Slow(Duration::from_millis(100))));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::no_retry());
    let pool = WorkerPool::new(h.worker(Duration::from_secs(5)), 2, 16);
    let tx = pool.sender();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pool.run(shutdown_rx));

    for _ in 0..6 {
        tx.send(ExecutionRequest::scheduled(task_id)).await.unwrap();
    }
    let records = wait_finished(&h, task_id, 6).await;

    assert!(records.iter().all(|r| r.status == ExecutionStatus::Success));
    assert_eq!(h.stats().opened(), 6);
    assert!(h.stats().peak() <= 2, "peak was {}", h.stats().peak());
    assert_eq!(h.sink.results_for(task_id, 100).unwrap().len(), 6);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn failed_attempt_is_requeued_with_same_token() {
    let h = Harness::new(FakeConnector::scripted(vec![Step::Refuse], Step::Rows));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::new(2, Duration::from_millis(50)));
    let pool = WorkerPool::new(h.worker(Duration::from_secs(5)), 2, 16);
    let tx = pool.sender();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pool.run(shutdown_rx));

    tx.send(ExecutionRequest::scheduled(task_id)).await.unwrap();
    let records = wait_finished(&h, task_id, 1).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Success);
    assert_eq!(records[0].retry_count, 1);
    assert_eq!(h.stats().refused(), 1);
    assert_eq!(h.stats().opened(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn duplicate_delivery_runs_once() {
    let h = Harness::new(FakeConnector::always(Step::Slow(Duration::from_millis(100))));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::no_retry());
    let pool = WorkerPool::new(h.worker(Duration::from_secs(5)), 4, 16);
    let tx = pool.sender();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pool.run(shutdown_rx));

    let token = ExecutionToken::new();
    for _ in 0..3 {
        tx.send(ExecutionRequest::with_token(task_id, token.clone()))
            .await
            .unwrap();
    }
    wait_finished(&h, task_id, 1).await;
    // let any straggling duplicate reach the worker
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.stats().opened(), 1);
    assert_eq!(h.ledger.list(&LedgerFilter::for_task(task_id)).unwrap().len(), 1);
    assert_eq!(h.sink.results_for(task_id, 10).unwrap().len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_running_attempts() {
    let h = Harness::new(FakeConnector::always(Step::Slow(Duration::from_millis(200))));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::no_retry());
    let pool = WorkerPool::new(h.worker(Duration::from_secs(5)), 1, 16);
    let tx = pool.sender();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pool.run(shutdown_rx));

    tx.send(ExecutionRequest::scheduled(task_id)).await.unwrap();
    // wait for the attempt to be admitted before shutting down
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.stats().opened() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "attempt never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let records = h.ledger.list(&LedgerFilter::for_task(task_id)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Success);
    assert_eq!(h.stats().closed(), 1);
}
