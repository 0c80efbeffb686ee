//! CLI commands routed against an in-memory Confluence.

use super::test_utils::no_sleep_retry;
use clap::Parser;
use confluence_bulk::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use confluence_bulk::cli::{
    Cli, RunContext, EXIT_CANCELLED, EXIT_ITEM_FAILURES, EXIT_SUCCESS,
};
use confluence_bulk::config::BulkConfig;
use confluence_bulk::error::{BulkError, RemoteError};
use confluence_bulk::transport::MemoryTransport;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::Arc;
use tempfile::TempDir;

fn context(dir: &TempDir, transport: Arc<MemoryTransport>) -> RunContext {
    let mut config = BulkConfig::default();
    config.checkpoint.dir = Some(dir.path().join("checkpoints"));
    RunContext::new(config)
        .with_transport(transport)
        .with_retry(no_sleep_retry())
        .with_interactive(false)
}

async fn run(ctx: &RunContext, args: &[&str]) -> (Result<i32, BulkError>, String) {
    let mut argv = vec!["confluence-bulk"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).unwrap();
    let mut out: Vec<u8> = Vec::new();
    let result = ctx.execute(&cli.command, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

fn json_lines(output: &str) -> Vec<Value> {
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn label_add_streams_json_lines_with_a_summary() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(5));
    let ctx = context(&dir, transport.clone());

    let (result, output) = run(
        &ctx,
        &["label-add", "--label", "reviewed", "type = page", "--yes", "--format", "json", "--batch-size", "2"],
    )
    .await;

    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    let records = json_lines(&output);
    assert_eq!(records.len(), 6);
    assert!(records[..5].iter().all(|r| r["type"] == "item" && r["status"] == "success"));
    let summary = &records[5];
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["operation"], "label-add");
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["succeeded"], 5);
    assert_eq!(summary["batches"], 3);
    assert!(summary.get("checkpoint").is_none());
    assert_eq!(transport.mutations_by_id().len(), 5);
}

#[tokio::test]
async fn item_failures_exit_with_one() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(3));
    transport.fail_always("page-1", RemoteError::from_status(403, "forbidden"));
    let ctx = context(&dir, transport);

    let (result, output) = run(&ctx, &["label-remove", "--label", "old", "type = page", "-y"]).await;

    assert_eq!(result.unwrap(), EXIT_ITEM_FAILURES);
    assert!(output.contains("Failures"));
    assert!(output.contains("page-1"));
}

#[tokio::test]
async fn delete_without_confirmation_is_refused_off_terminal() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(3));
    let ctx = context(&dir, transport.clone());

    let (result, _) = run(&ctx, &["delete", "type = page"]).await;

    assert!(matches!(result, Err(BulkError::Validation(_))));
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn confirmed_delete_previews_then_deletes() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(3));
    let ctx = context(&dir, transport.clone());

    let (result, output) = run(&ctx, &["delete", "type = page", "--yes"]).await;

    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    assert_eq!(transport.mutate_calls(), 3);
    assert!(transport.is_deleted("page-2"));
    assert!(output.contains("Succeeded"));
}

#[tokio::test]
async fn large_runs_need_confirmation() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(60));
    let ctx = context(&dir, transport.clone());

    let (result, _) = run(&ctx, &["label-add", "--label", "x", "type = page"]).await;
    assert!(matches!(result, Err(BulkError::Validation(_))));
    assert_eq!(transport.mutate_calls(), 0);

    // Below the threshold no confirmation is asked for.
    let (result, _) = run(&ctx, &["label-add", "--label", "x", "type = page", "--max-items", "10"]).await;
    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    assert_eq!(transport.mutations_by_id().len(), 10);
}

#[tokio::test]
async fn dry_run_never_asks_and_never_mutates() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(4));
    let ctx = context(&dir, transport.clone());

    let (result, output) = run(&ctx, &["delete", "type = page", "--dry-run"]).await;

    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    assert!(output.contains("Dry run"));
    assert!(output.contains("Would succeed"));
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn resume_is_rejected_for_delete() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(2));
    let ctx = context(&dir, transport.clone());

    let (result, _) = run(&ctx, &["delete", "type = page", "--yes", "--resume"]).await;

    assert!(matches!(result, Err(BulkError::Validation(_))));
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn cancelled_run_exits_with_130() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(4));
    let ctx = context(&dir, transport.clone());
    ctx.cancel_token().cancel();

    let (result, output) = run(&ctx, &["label-add", "--label", "x", "type = page", "-y", "--format", "json"]).await;

    assert_eq!(result.unwrap(), EXIT_CANCELLED);
    let records = json_lines(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "cancelled");
    assert_eq!(transport.mutate_calls(), 0);
}

#[tokio::test]
async fn cancelled_preview_stops_before_confirmation() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(4));
    let ctx = context(&dir, transport.clone());
    ctx.cancel_token().cancel();

    // Without --yes this would be refused off-terminal if the prompt were reached.
    let (result, output) = run(&ctx, &["delete", "type = page", "--format", "json"]).await;

    assert_eq!(result.unwrap(), EXIT_CANCELLED);
    let records = json_lines(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "cancelled");
    assert_eq!(transport.mutate_calls(), 0);
}

/// Writer standing in for a stdout whose reader went away.
struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader closed"))
    }
}

#[tokio::test]
async fn report_write_failure_after_mutations_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(3));
    let ctx = context(&dir, transport.clone());

    for format in ["json", "text"] {
        let cli = Cli::try_parse_from([
            "confluence-bulk",
            "label-add",
            "--label",
            "reviewed",
            "type = page",
            "--yes",
            "--format",
            format,
        ])
        .unwrap();
        let result = ctx.execute(&cli.command, &mut ClosedPipe).await;
        assert_eq!(result.unwrap(), EXIT_ITEM_FAILURES, "format {}", format);
    }
    assert_eq!(transport.mutations_by_id().len(), 3);
}

#[tokio::test]
async fn export_writes_the_destination_file() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(7));
    let ctx = context(&dir, transport.clone());
    let output_path = dir.path().join("out.jsonl");
    let output_arg = output_path.to_str().unwrap();

    let (result, output) = run(
        &ctx,
        &["export", "type = page", "--output", output_arg, "--include-body", "--batch-size", "3"],
    )
    .await;

    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    assert!(output.contains("Output:"));
    let written = std::fs::read_to_string(&output_path).unwrap();
    assert_eq!(written.lines().count(), 7);
    assert_eq!(transport.fetch_body_calls(), 7);
}

#[tokio::test]
async fn invalid_query_fails_before_any_request() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::with_pages(2));
    let ctx = context(&dir, transport.clone());

    let (result, _) = run(&ctx, &["label-add", "--label", "x", "title = \"unterminated", "-y"]).await;

    assert!(matches!(result, Err(BulkError::Validation(_))));
    assert_eq!(transport.search_calls(), 0);
}

#[tokio::test]
async fn checkpoint_show_and_clear() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, Arc::new(MemoryTransport::with_pages(0)));
    let path = dir.path().join("checkpoints").join("manual.json");
    let store = FileCheckpointStore::new();
    let mut checkpoint = Checkpoint::new("abc123");
    checkpoint.advance(["page-0", "page-1"], Some("offset:2".to_string()), 0);
    store.save(&path, &checkpoint).unwrap();
    let path_arg = path.to_str().unwrap();

    let (result, output) = run(&ctx, &["checkpoint", "show", path_arg, "--format", "json"]).await;
    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    let shown: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(shown["querySignature"], "abc123");
    assert_eq!(shown["cursor"], "offset:2");
    assert_eq!(shown["processedIds"].as_array().unwrap().len(), 2);

    let (result, output) = run(&ctx, &["checkpoint", "clear", path_arg]).await;
    assert_eq!(result.unwrap(), EXIT_SUCCESS);
    assert!(output.contains("Removed checkpoint"));
    assert!(store.load(&path).unwrap().is_none());

    let (result, _) = run(&ctx, &["checkpoint", "show", path_arg]).await;
    assert!(matches!(result, Err(BulkError::Validation(_))));
}

#[test]
fn permission_commands_require_a_principal() {
    let missing = Cli::try_parse_from([
        "confluence-bulk",
        "permission-add",
        "--operation",
        "read",
        "type = page",
    ]);
    assert!(missing.is_err());

    let ok = Cli::try_parse_from([
        "confluence-bulk",
        "permission-add",
        "--operation",
        "read",
        "--group",
        "staff",
        "type = page",
    ]);
    assert!(ok.is_ok());
}

#[test]
fn quiet_and_verbose_conflict() {
    let parsed = Cli::try_parse_from(["confluence-bulk", "-q", "-v", "delete", "type = page"]);
    assert!(parsed.is_err());
}
