//! Checkpointed Streaming Export
//!
//! Streams matching items to a JSON Lines file, one record per item. The
//! byte offset of the last durable record is stored in the checkpoint so an
//! interrupted export can truncate any partial tail and continue appending.

use crate::bulk::dry_run::DryRunSimulator;
use crate::bulk::executor::{
    ActiveCheckpoint, BatchExecutor, BatchHandler, CancelToken, RunObserver, RunOutcome,
};
use crate::bulk::operation::OperationKind;
use crate::bulk::run::{prepare_checkpoint, BulkRun};
use crate::error::{BulkError, RemoteError};
use crate::retry::RetryPolicy;
use crate::selector::ResourceSelector;
use crate::transport::Transport;
use crate::types::{CandidateItem, ItemKind, ItemResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One line of the export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ExportRecord {
    fn new(item: &CandidateItem, body: Option<String>) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            title: item.display_name.clone(),
            revision: item.revision.clone(),
            body,
        }
    }
}

/// Batch handler writing JSON Lines records in selector order.
pub struct ExportHandler {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    include_body: bool,
    workers: usize,
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
}

impl ExportHandler {
    /// Open the destination. A fresh export truncates it; a resumed export
    /// cuts it back to `resume_offset` and appends from there.
    pub fn open(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        path: &Path,
        resume_offset: Option<u64>,
        include_body: bool,
        workers: usize,
    ) -> Result<Self, BulkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let (file, offset) = match resume_offset {
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)?;
                (file, 0)
            }
            Some(offset) => {
                let mut file = OpenOptions::new().write(true).open(path).map_err(|e| {
                    BulkError::Output(format!(
                        "cannot reopen export destination {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let len = file.metadata()?.len();
                if len < offset {
                    return Err(BulkError::Output(format!(
                        "export destination {} is shorter ({} bytes) than the checkpointed offset {}",
                        path.display(),
                        len,
                        offset
                    )));
                }
                if len > offset {
                    warn!(
                        path = %path.display(),
                        discarded = len - offset,
                        "discarding uncommitted export tail"
                    );
                }
                file.set_len(offset)?;
                file.seek(SeekFrom::Start(offset))?;
                (file, offset)
            }
        };
        Ok(Self {
            transport,
            retry,
            include_body,
            workers: workers.max(1),
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, including records not yet flushed.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn fetch(&self, item: &CandidateItem) -> Result<Option<String>, RemoteError> {
        if !self.include_body {
            return Ok(None);
        }
        self.retry
            .execute(|| self.transport.fetch_body(item))
            .await
            .map(Some)
    }

    fn write_record(&mut self, record: &ExportRecord) -> Result<(), BulkError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| BulkError::Output(format!("failed to encode export record: {}", e)))?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.offset += line.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for ExportHandler {
    fn is_dry_run(&self) -> bool {
        false
    }

    async fn handle_batch(&mut self, batch: &[CandidateItem]) -> Result<Vec<ItemResult>, BulkError> {
        let fetched: Vec<(&CandidateItem, Result<Option<String>, RemoteError>)> = {
            let this = &*self;
            let pending: Vec<_> = batch
                .iter()
                .map(|item| async move { (item, this.fetch(item).await) })
                .collect();
            stream::iter(pending)
                .buffered(this.workers)
                .collect()
                .await
        };

        let mut results = Vec::with_capacity(fetched.len());
        for (item, body) in fetched {
            match body {
                Ok(body) => {
                    self.write_record(&ExportRecord::new(item, body))?;
                    results.push(ItemResult::success(item, None));
                }
                Err(err) => {
                    warn!(id = %item.id, kind = %err.kind, error = %err.message, "body_fetch_failed");
                    results.push(ItemResult::failed(item, err.kind, err.message));
                }
            }
        }
        Ok(results)
    }

    async fn flush(&mut self) -> Result<u64, BulkError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        debug!(path = %self.path.display(), offset = self.offset, "export_flushed");
        Ok(self.offset)
    }
}

/// Absolute form of `path` used to match a checkpoint to its destination.
fn canonical_destination(path: &Path) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    });
    resolved.to_string_lossy().into_owned()
}

/// Run an export of `run.query` into the JSON Lines file at `destination`.
pub async fn run_export(
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    run: BulkRun,
    destination: &Path,
    cancel: CancelToken,
    observer: &mut dyn RunObserver,
) -> Result<RunOutcome, BulkError> {
    if run.operation.kind != OperationKind::Export {
        return Err(BulkError::Validation(format!(
            "{} is not an export operation",
            run.operation.kind
        )));
    }
    run.operation.validate()?;
    run.query.validate()?;

    let mut checkpoint = prepare_checkpoint(&run.query, &run.operation, run.checkpoint.as_ref())?;
    if let Some(active) = checkpoint.as_mut().filter(|active| active.is_resumed()) {
        active.bind_destination(&canonical_destination(destination))?;
    }
    let cursor = checkpoint.as_ref().and_then(ActiveCheckpoint::cursor);
    let mut selector =
        ResourceSelector::resume_from(Arc::clone(&transport), retry.clone(), run.query.clone(), cursor)?;

    let mut handler: Box<dyn BatchHandler> = if run.operation.dry_run {
        Box::new(DryRunSimulator::new(
            transport,
            retry,
            run.operation.clone(),
            run.workers,
        ))
    } else {
        let resume_offset = checkpoint
            .as_ref()
            .filter(|active| active.is_resumed())
            .map(|active| active.state().output_offset);
        let handler = ExportHandler::open(
            transport,
            retry,
            destination,
            resume_offset,
            run.operation.include_body(),
            run.workers,
        )?;
        if let Some(active) = checkpoint.as_mut() {
            active.bind_destination(&canonical_destination(destination))?;
        }
        Box::new(handler)
    };

    info!(
        destination = %destination.display(),
        dry_run = run.operation.dry_run,
        include_body = run.operation.include_body(),
        cql = %run.query.effective_cql(),
        "export_started"
    );
    BatchExecutor::new(run.execution_options(), cancel)
        .run(&mut selector, handler.as_mut(), checkpoint, observer)
        .await
}
