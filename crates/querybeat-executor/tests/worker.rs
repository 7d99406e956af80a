mod common;

use std::time::Duration;

use common::{select_one, FakeConnector, Harness, Step};
use querybeat_core::{ExecutionRequest, ExecutionStatus, RetryPolicy};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn select_one_is_recorded_and_sunk() {
    let h = Harness::new(FakeConnector::always(Step::Rows));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::no_retry());
    let worker = h.worker(TIMEOUT);

    let report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert!(report.ran);
    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.retry_after, None);

    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.result, Some(select_one()));

    let rows = h.sink.results_for(task_id, 10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_token, report.token);
    assert_eq!(rows[0].result_data, select_one());

    assert_eq!(h.stats().opened(), 1);
    assert_eq!(h.stats().closed(), 1);
    assert!(h.catalog.get_task(task_id).unwrap().unwrap().last_run.is_some());
}

#[tokio::test]
async fn write_statement_fails_without_connecting() {
    let h = Harness::new(FakeConnector::always(Step::Rows));
    let task_id = h.task("DELETE FROM users", RetryPolicy::new(3, Duration::ZERO));
    let worker = h.worker(TIMEOUT);

    let report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failure);
    assert_eq!(report.retry_after, None);

    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failure);
    assert_eq!(record.retry_count, 0);
    assert!(record
        .error_message
        .unwrap()
        .starts_with("validation error"));
    assert_eq!(h.stats().opened() + h.stats().refused(), 0);
    assert!(h.sink.results_for(task_id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn recoverable_failures_retry_then_fail() {
    let h = Harness::new(FakeConnector::always(Step::Refuse));
    let task_id = h.task("SELECT 1", RetryPolicy::new(3, Duration::from_millis(10)));
    let worker = h.worker(TIMEOUT);

    let mut report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    let token = report.token.clone();
    let mut attempts = 1;
    while let Some(delay) = report.retry_after {
        assert_eq!(report.status, ExecutionStatus::Retry);
        assert_eq!(delay, Duration::from_millis(10));
        report = worker
            .execute(ExecutionRequest::with_token(task_id, token.clone()))
            .await
            .unwrap();
        attempts += 1;
    }

    assert_eq!(attempts, 4);
    assert_eq!(report.status, ExecutionStatus::Failure);
    assert_eq!(h.stats().refused(), 4);

    let records = h.ledger.list(&querybeat_ledger::LedgerFilter::for_task(task_id)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failure);
    assert_eq!(records[0].retry_count, 3);
    assert_eq!(
        records[0].error_message.as_deref(),
        Some("connection error: warehouse.internal:5432: connection refused")
    );

    let retries: Vec<u32> = h
        .ledger
        .history(&token)
        .unwrap()
        .into_iter()
        .filter(|e| e.status == ExecutionStatus::Retry)
        .map(|e| e.retry_count)
        .collect();
    assert_eq!(retries, vec![1, 2, 3]);
}

#[tokio::test]
async fn query_errors_are_retried() {
    let h = Harness::new(FakeConnector::scripted(vec![Step::QueryFails], Step::Rows));
    let task_id = h.task("SELECT * FROM missing", RetryPolicy::new(1, Duration::ZERO));
    let worker = h.worker(TIMEOUT);

    let first = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Retry);
    let record = h.ledger.get(&first.token).unwrap().unwrap();
    assert!(record
        .error_message
        .unwrap()
        .starts_with("query execution error"));

    let second = worker
        .execute(ExecutionRequest::with_token(task_id, first.token.clone()))
        .await
        .unwrap();
    assert_eq!(second.status, ExecutionStatus::Success);
    assert_eq!(h.stats().opened(), 2);
    assert_eq!(h.stats().closed(), 2);
}

#[tokio::test]
async fn hung_query_times_out_and_closes() {
    let h = Harness::new(FakeConnector::always(Step::Hang));
    let task_id = h.task("SELECT pg_sleep(3600)", RetryPolicy::new(1, Duration::ZERO));
    let worker = h.worker(Duration::from_millis(200));

    let report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Retry);
    assert_eq!(h.stats().opened(), 1);
    assert_eq!(h.stats().closed(), 1);

    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Retry);
    assert_eq!(record.retry_count, 1);
    assert!(record.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn sink_failure_never_records_success() {
    let h = Harness::new(FakeConnector::always(Step::Rows));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::new(1, Duration::ZERO));
    let worker = h.worker(TIMEOUT);
    h.take_sink_offline();

    let report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Retry);
    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Retry);
    assert!(record.result.is_none());
    assert!(record.error_message.unwrap().starts_with("sink write error"));

    h.bring_sink_back();
    let retried = worker
        .execute(ExecutionRequest::with_token(task_id, report.token.clone()))
        .await
        .unwrap();
    assert_eq!(retried.status, ExecutionStatus::Success);
    assert_eq!(h.sink.results_for(task_id, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn finished_token_is_not_run_again() {
    let h = Harness::new(FakeConnector::always(Step::Rows));
    let task_id = h.task("SELECT 1 AS x", RetryPolicy::no_retry());
    let worker = h.worker(TIMEOUT);

    let first = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    let again = worker
        .execute(ExecutionRequest::with_token(task_id, first.token.clone()))
        .await
        .unwrap();

    assert!(!again.ran);
    assert_eq!(again.status, ExecutionStatus::Success);
    assert_eq!(h.stats().opened(), 1);
    assert_eq!(h.sink.results_for(task_id, 10).unwrap().len(), 1);
    assert_eq!(h.ledger.history(&first.token).unwrap().len(), 2);
}

#[tokio::test]
async fn missing_task_is_a_failure() {
    let h = Harness::new(FakeConnector::always(Step::Rows));
    let worker = h.worker(TIMEOUT);

    let report = worker.execute(ExecutionRequest::scheduled(999)).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failure);

    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(
        record.error_message.as_deref(),
        Some("Task with ID 999 does not exist.")
    );
    assert_eq!(h.stats().opened() + h.stats().refused(), 0);
}

#[tokio::test]
async fn zero_retries_fail_on_first_error() {
    let h = Harness::new(FakeConnector::always(Step::Refuse));
    let task_id = h.task("SELECT 1", RetryPolicy::no_retry());
    let worker = h.worker(TIMEOUT);

    let report = worker.execute(ExecutionRequest::scheduled(task_id)).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Failure);
    let record = h.ledger.get(&report.token).unwrap().unwrap();
    assert_eq!(record.retry_count, 0);
}
