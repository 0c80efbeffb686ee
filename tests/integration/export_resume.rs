//! Interrupted exports resume from the committed offset without duplicates.

use super::test_utils::{file_checkpoints, no_sleep_retry, page_query};
use confluence_bulk::bulk::operation::PARAM_INCLUDE_BODY;
use confluence_bulk::bulk::{
    BatchCommit, BulkRun, CancelToken, NoopObserver, OperationDescriptor, OperationKind,
    RunObserver, RunStatus,
};
use confluence_bulk::checkpoint::{CheckpointStore, FileCheckpointStore};
use confluence_bulk::error::BulkError;
use confluence_bulk::export::{run_export, ExportRecord};
use confluence_bulk::transport::MemoryTransport;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Cancels the run once `after` batches have been committed.
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

fn export_op(batch_size: usize) -> OperationDescriptor {
    OperationDescriptor::new(OperationKind::Export)
        .with_param(PARAM_INCLUDE_BODY, "true")
        .with_batch_size(batch_size)
}

fn read_records(path: &Path) -> Vec<ExportRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn cancelled_export_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("export.jsonl");
    let transport = Arc::new(MemoryTransport::with_pages(250));

    let cancel = CancelToken::new();
    let mut observer = CancelAfter {
        cancel: cancel.clone(),
        after: 2,
    };
    let first = run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(30), export_op(50)).with_checkpoint(Some(file_checkpoints(&dir, false))),
        &output,
        cancel,
        &mut observer,
    )
    .await
    .unwrap();

    assert_eq!(first.status, RunStatus::Cancelled);
    assert_eq!(first.checkpoint_commits, 2);
    assert_eq!(read_records(&output).len(), 100);

    let checkpoint_path = first.checkpoint_path.clone().expect("checkpoint kept");
    let stored = FileCheckpointStore::new().load(&checkpoint_path).unwrap().unwrap();
    assert_eq!(stored.processed_ids.len(), 100);
    assert_eq!(stored.output_offset, std::fs::metadata(&output).unwrap().len());

    let second = run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(30), export_op(50)).with_checkpoint(Some(file_checkpoints(&dir, true))),
        &output,
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert!(second.resumed);
    assert_eq!(second.summary.succeeded, 150);

    let records = read_records(&output);
    assert_eq!(records.len(), 250);
    let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 250);
    let expected: Vec<String> = (0..250).map(|n| format!("page-{}", n)).collect();
    let actual: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(actual, expected);
    assert_eq!(records[7].body.as_deref(), Some("<p>Page 7</p>"));

    assert!(!checkpoint_path.exists());
}

#[tokio::test]
async fn resume_into_another_destination_is_refused() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("a.jsonl");
    let other = dir.path().join("notes.txt");
    let notes = "first line\nsecond line\nthird line\n";
    std::fs::write(&other, notes).unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(6));

    let cancel = CancelToken::new();
    let mut observer = CancelAfter {
        cancel: cancel.clone(),
        after: 1,
    };
    let first = run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(10), export_op(2)).with_checkpoint(Some(file_checkpoints(&dir, false))),
        &output,
        cancel,
        &mut observer,
    )
    .await
    .unwrap();
    assert_eq!(first.status, RunStatus::Cancelled);
    let checkpoint_path = first.checkpoint_path.clone().expect("checkpoint kept");
    let stored = FileCheckpointStore::new().load(&checkpoint_path).unwrap().unwrap();
    assert!(stored.destination.as_deref().unwrap().ends_with("a.jsonl"));

    let refused = run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(10), export_op(2)).with_checkpoint(Some(file_checkpoints(&dir, true))),
        &other,
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await;

    assert!(matches!(refused, Err(BulkError::Validation(_))));
    assert_eq!(std::fs::read_to_string(&other).unwrap(), notes);

    // The original destination still resumes.
    let resumed = run_export(
        transport,
        no_sleep_retry(),
        BulkRun::new(page_query(10), export_op(2)).with_checkpoint(Some(file_checkpoints(&dir, true))),
        &output,
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(read_records(&output).len(), 6);
}

#[tokio::test]
async fn torn_tail_after_a_crash_is_discarded_on_resume() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("export.jsonl");
    let transport = Arc::new(MemoryTransport::with_pages(40));

    let cancel = CancelToken::new();
    let mut observer = CancelAfter {
        cancel: cancel.clone(),
        after: 1,
    };
    run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(50), export_op(10)).with_checkpoint(Some(file_checkpoints(&dir, false))),
        &output,
        cancel,
        &mut observer,
    )
    .await
    .unwrap();

    // Bytes written after the last commit, as if the process died mid-batch.
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&output).unwrap();
        file.write_all(b"{\"id\":\"page-10\",\"kind\":\"pa").unwrap();
    }

    let resumed = run_export(
        transport,
        no_sleep_retry(),
        BulkRun::new(page_query(50), export_op(10)).with_checkpoint(Some(file_checkpoints(&dir, true))),
        &output,
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    let records = read_records(&output);
    assert_eq!(records.len(), 40);
    assert_eq!(records[10].id, "page-10");
}

#[tokio::test]
async fn export_preview_leaves_the_destination_untouched() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("export.jsonl");
    let transport = Arc::new(MemoryTransport::with_pages(5));

    let outcome = run_export(
        transport.clone(),
        no_sleep_retry(),
        BulkRun::new(page_query(50), export_op(2).with_dry_run(true))
            .with_checkpoint(Some(file_checkpoints(&dir, false))),
        &output,
        CancelToken::new(),
        &mut NoopObserver,
    )
    .await
    .unwrap();

    assert!(outcome.summary.dry_run);
    assert_eq!(outcome.summary.succeeded, 5);
    assert!(!output.exists());
    assert_eq!(transport.fetch_body_calls(), 0);
}
