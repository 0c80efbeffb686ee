//! Resuming mutations from stored checkpoints.

use super::test_utils::{file_checkpoints, no_sleep_retry, page_query};
use confluence_bulk::bulk::operation::PARAM_LABEL;
use confluence_bulk::bulk::{
    run_bulk, BatchCommit, BulkRun, CancelToken, CheckpointSettings, NoopObserver,
    OperationDescriptor, OperationKind, RunObserver, RunOutcome, RunStatus,
};
use confluence_bulk::checkpoint::{
    query_signature, Checkpoint, CheckpointStore, FileCheckpointStore, SledCheckpointStore,
    CHECKPOINT_FORMAT_VERSION,
};
use confluence_bulk::error::BulkError;
use confluence_bulk::transport::MemoryTransport;
use confluence_bulk::types::{Query, Scope};
use std::sync::Arc;
use tempfile::TempDir;

struct CancelAfter {
    cancel: CancelToken,
    after: u64,
}

impl RunObserver for CancelAfter {
    fn on_batch_committed(&mut self, commit: &BatchCommit) {
        if commit.batch_index >= self.after {
            self.cancel.cancel();
        }
    }
}

fn label_add(label: &str) -> OperationDescriptor {
    OperationDescriptor::new(OperationKind::LabelAdd)
        .with_param(PARAM_LABEL, label)
        .with_batch_size(4)
        .with_max_items(None)
}

async fn cancelled_run(
    transport: Arc<MemoryTransport>,
    settings: CheckpointSettings,
    op: OperationDescriptor,
    after: u64,
) -> RunOutcome {
    let cancel = CancelToken::new();
    let mut observer = CancelAfter {
        cancel: cancel.clone(),
        after,
    };
    run_bulk(
        transport,
        no_sleep_retry(),
        BulkRun::new(page_query(3), op).with_checkpoint(Some(settings)),
        cancel,
        &mut observer,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn resumed_mutation_applies_each_item_once() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(17));

    let first = cancelled_run(transport.clone(), file_checkpoints(&dir, false), label_add("x"), 2).await;
    assert_eq!(first.status, RunStatus::Cancelled);
    assert_eq!(first.summary.total, 8);

    let second = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(3), label_add("x"))
            .with_checkpoint(Some(file_checkpoints(&dir, true))),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert!(second.resumed);
    assert_eq!(second.summary.total, 9);
    // Page size 3 does not divide the batch size, so a partially consumed
    // page is fetched again and its committed ids are skipped.
    assert!(second.summary.already_processed > 0);

    let mutations = transport.mutations_by_id();
    assert_eq!(mutations.len(), 17);
    assert!(mutations.values().all(|count| *count == 1));
}

#[tokio::test]
async fn resume_with_a_different_operation_is_rejected() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(10));
    let settings = CheckpointSettings {
        path: Some(dir.path().join("run.json")),
        ..file_checkpoints(&dir, false)
    };
    cancelled_run(transport.clone(), settings.clone(), label_add("x"), 1).await;
    let calls_before = transport.mutate_calls();

    let err = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(3), label_add("y")).with_checkpoint(Some(CheckpointSettings {
            resume: true,
            ..settings
        })),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BulkError::SignatureMismatch { .. }));
    assert_eq!(transport.mutate_calls(), calls_before);
}

#[tokio::test]
async fn resume_without_a_checkpoint_starts_from_the_beginning() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(5));

    let outcome = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(3), label_add("x")).with_checkpoint(Some(file_checkpoints(&dir, true))),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!outcome.resumed);
    assert_eq!(outcome.summary.succeeded, 5);
}

#[tokio::test]
async fn newer_checkpoint_formats_are_refused() {
    let dir = TempDir::new().unwrap();
    let query = page_query(3);
    let op = label_add("x");
    let signature = query_signature(&query, &op);
    let path = dir.path().join("run.json");

    let mut checkpoint = Checkpoint::new(signature);
    checkpoint.format_version = CHECKPOINT_FORMAT_VERSION + 1;
    FileCheckpointStore::new().save(&path, &checkpoint).unwrap();

    let err = run_bulk(
        Arc::new(MemoryTransport::with_pages(2)),
        no_sleep_retry(),
        BulkRun::new(query, op).with_checkpoint(Some(CheckpointSettings {
            path: Some(path),
            ..file_checkpoints(&dir, true)
        })),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BulkError::Validation(_)));
}

#[tokio::test]
async fn sled_backend_resumes_like_the_file_backend() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn CheckpointStore> =
        Arc::new(SledCheckpointStore::open(&dir.path().join("checkpoints.sled")).unwrap());
    let settings = CheckpointSettings {
        store: Arc::clone(&store),
        dir: dir.path().to_path_buf(),
        path: None,
        resume: false,
    };
    let transport = Arc::new(MemoryTransport::with_pages(12));

    let first = cancelled_run(transport.clone(), settings.clone(), label_add("x"), 1).await;
    let path = first.checkpoint_path.clone().expect("checkpoint kept");
    assert_eq!(store.load(&path).unwrap().unwrap().processed_ids.len(), 4);

    let second = run_bulk(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(3), label_add("x")).with_checkpoint(Some(CheckpointSettings {
            resume: true,
            ..settings
        })),
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(second.summary.succeeded, 8);
    assert!(store.load(&path).unwrap().is_none());
    assert!(transport.mutations_by_id().values().all(|count| *count == 1));
}

#[test]
fn scope_changes_the_signature() {
    let op = label_add("x");
    let plain = Query::new("type = page", Scope::default());
    let scoped = Query::new(
        "type = page",
        Scope {
            space: Some("ENG".to_string()),
            ..Scope::default()
        },
    );
    assert_ne!(query_signature(&plain, &op), query_signature(&scoped, &op));
}
