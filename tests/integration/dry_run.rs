//! Dry runs predict effects without mutating anything or writing checkpoints.

use super::test_utils::{file_checkpoints, no_sleep_retry, page_query};
use confluence_bulk::bulk::operation::{PARAM_LABEL, PARAM_OPERATION, PARAM_USER};
use confluence_bulk::bulk::{run_bulk, BulkRun, CancelToken, OperationDescriptor, OperationKind, RunStatus};
use confluence_bulk::report::CollectingObserver;
use confluence_bulk::transport::{ItemSnapshot, MemoryTransport};
use confluence_bulk::types::ItemStatus;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;

fn checkpoint_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("checkpoints"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn label_add_preview_predicts_every_item() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(5));
    let op = OperationDescriptor::new(OperationKind::LabelAdd)
        .with_param(PARAM_LABEL, "needs-review")
        .with_dry_run(true)
        .with_batch_size(2);
    let run = BulkRun::new(page_query(3), op).with_checkpoint(Some(file_checkpoints(&dir, false)));

    let mut observer = CollectingObserver::new(10);
    let outcome = run_bulk(transport.clone(), no_sleep_retry(), run, CancelToken::new(), &mut observer)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.summary.dry_run);
    assert_eq!(outcome.summary.succeeded, 5);
    assert_eq!(outcome.checkpoint_commits, 0);
    assert_eq!(outcome.checkpoint_path, None);

    let results = observer.results();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.predicted && r.status == ItemStatus::Success));
    let first = results[0].message.as_deref().unwrap();
    assert!(first.contains("needs-review"), "message was {}", first);
    assert!(first.contains("Page 0"), "message was {}", first);

    assert_eq!(transport.mutate_calls(), 0);
    assert_eq!(transport.snapshot_calls(), 5);
    assert_eq!(checkpoint_files(&dir), 0);
}

#[tokio::test]
async fn items_already_in_the_target_state_are_skipped() {
    let transport = Arc::new(MemoryTransport::with_pages(4));
    transport.set_snapshot(
        "page-1",
        ItemSnapshot {
            labels: BTreeSet::from(["needs-review".to_string()]),
            ..ItemSnapshot::default()
        },
    );
    let op = OperationDescriptor::new(OperationKind::LabelAdd)
        .with_param(PARAM_LABEL, "needs-review")
        .with_dry_run(true);

    let mut observer = CollectingObserver::new(10);
    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(50), op),
        CancelToken::new(),
        &mut observer,
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.succeeded, 3);
    assert_eq!(outcome.summary.skipped, 1);
    let skipped = observer
        .results()
        .iter()
        .find(|r| r.status == ItemStatus::Skipped)
        .unwrap();
    assert_eq!(skipped.item_id, "page-1");
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn permission_preview_reads_current_restrictions() {
    let transport = Arc::new(MemoryTransport::with_pages(2));
    transport.set_snapshot(
        "page-0",
        ItemSnapshot {
            restrictions: BTreeMap::from([(
                "read".to_string(),
                BTreeSet::from(["user:abc-123".to_string()]),
            )]),
            ..ItemSnapshot::default()
        },
    );
    let op = OperationDescriptor::new(OperationKind::PermissionRemove)
        .with_param(PARAM_OPERATION, "read")
        .with_param(PARAM_USER, "abc-123")
        .with_dry_run(true);

    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(50), op),
        CancelToken::new(),
        &mut CollectingObserver::new(0),
    )
    .await
    .unwrap();

    // page-0 holds the restriction, page-1 does not.
    assert_eq!(outcome.summary.succeeded, 1);
    assert_eq!(outcome.summary.skipped, 1);
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn delete_preview_needs_no_lookup() {
    let transport = Arc::new(MemoryTransport::with_pages(3));
    let op = OperationDescriptor::new(OperationKind::Delete).with_dry_run(true);

    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(50), op),
        CancelToken::new(),
        &mut CollectingObserver::new(0),
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.succeeded, 3);
    assert_eq!(transport.snapshot_calls(), 0);
    assert_eq!(transport.mutate_calls(), 0);
    assert!(!transport.is_deleted("page-0"));
}
