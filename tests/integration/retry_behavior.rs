//! Retry schedule as seen through full runs.

use super::test_utils::{no_sleep_retry, page_query, RecordingSleeper};
use confluence_bulk::bulk::operation::PARAM_LABEL;
use confluence_bulk::bulk::{
    run_bulk, BatchCommit, BulkRun, CancelToken, NoopObserver, OperationDescriptor, OperationKind,
    RunObserver, RunStatus,
};
use confluence_bulk::error::{BulkError, ErrorKind, RemoteError};
use confluence_bulk::retry::{RetryConfig, RetryPolicy};
use confluence_bulk::transport::MemoryTransport;
use std::sync::Arc;
use std::time::Duration;

fn label_add() -> OperationDescriptor {
    OperationDescriptor::new(OperationKind::LabelAdd)
        .with_param(PARAM_LABEL, "reviewed")
        .with_max_items(None)
}

fn recording_policy(jitter: f64) -> (RetryPolicy, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let config = RetryConfig {
        base_delay_ms: 100,
        jitter,
        ..RetryConfig::default()
    };
    (RetryPolicy::new(config, sleeper.clone()), sleeper)
}

#[tokio::test]
async fn throttled_mutation_succeeds_after_two_backoffs() {
    let transport = Arc::new(MemoryTransport::with_pages(1));
    transport.fail_mutations(
        "page-0",
        [
            RemoteError::from_status(429, "slow down"),
            RemoteError::from_status(429, "slow down"),
        ],
    );
    let (retry, sleeper) = recording_policy(0.0);

    let outcome = run_bulk(
        transport.clone(),
        retry,
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.succeeded, 1);
    assert_eq!(transport.mutate_calls(), 3);
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn retry_after_hint_overrides_backoff() {
    let transport = Arc::new(MemoryTransport::with_pages(1));
    transport.fail_mutations(
        "page-0",
        [RemoteError::from_status(429, "slow down").with_retry_after(Some(Duration::from_secs(7)))],
    );
    let (retry, sleeper) = recording_policy(0.2);

    run_bulk(
        transport,
        retry,
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(sleeper.delays(), vec![Duration::from_secs(7)]);
}

#[tokio::test]
async fn jittered_delays_stay_within_bounds() {
    let transport = Arc::new(MemoryTransport::with_pages(1));
    transport.fail_always("page-0", RemoteError::from_status(502, "bad gateway"));
    let (retry, sleeper) = recording_policy(0.2);

    run_bulk(
        transport,
        retry,
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    let delays = sleeper.delays();
    assert_eq!(delays.len(), 3);
    for (n, delay) in delays.iter().enumerate() {
        let base = 100.0 * 2f64.powi(n as i32);
        let millis = delay.as_secs_f64() * 1000.0;
        assert!(millis >= base * 0.8 - 1.0 && millis <= base * 1.2 + 1.0, "delay {} out of range", millis);
    }
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error_kind() {
    let transport = Arc::new(MemoryTransport::with_pages(2));
    transport.fail_always("page-1", RemoteError::from_status(503, "unavailable"));

    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.summary.succeeded, 1);
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(outcome.summary.failures[0].error_kind, Some(ErrorKind::Server));
    // One initial attempt plus three retries for page-1, one call for page-0.
    assert_eq!(transport.mutate_calls(), 5);
}

#[tokio::test]
async fn non_transient_failures_are_not_retried() {
    let transport = Arc::new(MemoryTransport::with_pages(1));
    transport.fail_mutations("page-0", [RemoteError::from_status(409, "version conflict")]);
    let (retry, sleeper) = recording_policy(0.0);

    let outcome = run_bulk(
        transport.clone(),
        retry,
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.failures[0].error_kind, Some(ErrorKind::Conflict));
    assert_eq!(transport.mutate_calls(), 1);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn transient_search_failures_are_retried() {
    let transport = Arc::new(MemoryTransport::with_pages(3));
    transport.fail_searches([
        RemoteError::from_status(500, "oops"),
        RemoteError::from_status(429, "slow down"),
    ]);

    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.succeeded, 3);
    assert_eq!(transport.search_calls(), 3);
}

#[tokio::test]
async fn search_failure_before_the_first_batch_is_a_run_error() {
    let transport = Arc::new(MemoryTransport::with_pages(3));
    transport.fail_searches((0..4).map(|_| RemoteError::from_status(503, "down")));

    let err = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(10), label_add()),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BulkError::Remote(ref e) if e.kind == ErrorKind::Server));
    assert_eq!(transport.search_calls(), 4);
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn search_failure_mid_run_aborts_with_partial_summary() {
    let transport = Arc::new(MemoryTransport::with_pages(6));
    let op = label_add().with_batch_size(2);

    // First page serves the first batch; every later search fails.
    let mut observer = FailSearchesAfterFirstBatch {
        transport: transport.clone(),
    };
    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(2), op),
        CancelToken::new(),
        &mut observer,
    )
    .await
    .unwrap();

    assert!(matches!(outcome.status, RunStatus::Aborted { .. }));
    assert_eq!(outcome.summary.succeeded, 2);
    assert_eq!(outcome.batches, 1);
}

struct FailSearchesAfterFirstBatch {
    transport: Arc<MemoryTransport>,
}

impl RunObserver for FailSearchesAfterFirstBatch {
    fn on_batch_committed(&mut self, _commit: &BatchCommit) {
        self.transport
            .fail_searches((0..4).map(|_| RemoteError::from_status(503, "down")));
    }
}
