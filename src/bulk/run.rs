//! Wires a query and an operation into a selector, a handler and the batch
//! executor.

use crate::bulk::dry_run::DryRunSimulator;
use crate::bulk::executor::{
    ActiveCheckpoint, BatchExecutor, BatchHandler, CancelToken, ExecutionOptions, RunObserver,
    RunOutcome,
};
use crate::bulk::mutation::MutationHandler;
use crate::bulk::operation::{OperationDescriptor, OperationKind};
use crate::checkpoint::{default_checkpoint_path, query_signature, CheckpointStore};
use crate::error::BulkError;
use crate::retry::RetryPolicy;
use crate::selector::ResourceSelector;
use crate::transport::Transport;
use crate::types::Query;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where and how a run keeps its checkpoint.
#[derive(Clone)]
pub struct CheckpointSettings {
    pub store: Arc<dyn CheckpointStore>,
    /// Directory for default checkpoint paths.
    pub dir: PathBuf,
    /// Explicit checkpoint path; overrides the default under `dir`.
    pub path: Option<PathBuf>,
    pub resume: bool,
}

impl CheckpointSettings {
    pub fn resolve_path(&self, signature: &str) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_checkpoint_path(&self.dir, signature))
    }
}

/// Everything a bulk run needs besides the transport.
#[derive(Clone)]
pub struct BulkRun {
    pub query: Query,
    pub operation: OperationDescriptor,
    pub workers: usize,
    pub failure_report_limit: usize,
    pub checkpoint: Option<CheckpointSettings>,
}

impl BulkRun {
    pub fn new(query: Query, operation: OperationDescriptor) -> Self {
        Self {
            query,
            operation,
            workers: 4,
            failure_report_limit: ExecutionOptions::default().failure_report_limit,
            checkpoint: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<CheckpointSettings>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            batch_size: self.operation.batch_size,
            max_items: self.operation.max_items,
            failure_report_limit: self.failure_report_limit,
        }
    }

    /// Same run as a dry run: no checkpoint writes, no mutations. A resumed
    /// preview still skips ids the checkpoint already holds.
    pub fn as_preview(&self) -> Self {
        let mut preview = self.clone();
        preview.operation = preview.operation.clone().with_dry_run(true);
        preview
    }
}

/// Validate resume settings and open the checkpoint a run should use.
/// Non-resumable operations and fresh dry runs run without one.
pub fn prepare_checkpoint(
    query: &Query,
    operation: &OperationDescriptor,
    settings: Option<&CheckpointSettings>,
) -> Result<Option<ActiveCheckpoint>, BulkError> {
    let Some(settings) = settings else {
        return Ok(None);
    };
    if !operation.kind.is_resumable() {
        if settings.resume {
            return Err(BulkError::Validation(format!(
                "{} runs cannot be resumed",
                operation.kind
            )));
        }
        debug!(op = %operation.kind, "operation is not checkpointed");
        return Ok(None);
    }
    if operation.dry_run && !settings.resume {
        return Ok(None);
    }

    let signature = query_signature(query, operation);
    let path = settings.resolve_path(&signature);
    if !settings.resume && !operation.dry_run && settings.store.load(&path).ok().flatten().is_some() {
        warn!(path = %path.display(), "existing checkpoint will be overwritten; pass --resume to continue it");
    }
    let active = ActiveCheckpoint::open(Arc::clone(&settings.store), path, &signature, settings.resume)?;
    if active.is_resumed() {
        info!(
            path = %active.path().display(),
            processed = active.state().processed_ids.len(),
            commits = active.state().commits,
            "resuming from checkpoint"
        );
    }
    Ok(Some(active))
}

/// Run a mutating operation (or its dry run) to completion, cancellation or
/// abort. Exports go through [`crate::export::run_export`].
pub async fn run_bulk(
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    run: BulkRun,
    cancel: CancelToken,
    observer: &mut dyn RunObserver,
) -> Result<RunOutcome, BulkError> {
    if run.operation.kind == OperationKind::Export {
        return Err(BulkError::Validation(
            "export runs need an output destination".to_string(),
        ));
    }
    run.operation.validate()?;
    run.query.validate()?;

    let checkpoint = prepare_checkpoint(&run.query, &run.operation, run.checkpoint.as_ref())?;
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
        Box::new(MutationHandler::new(
            transport,
            retry,
            run.operation.clone(),
            run.workers,
        ))
    };

    info!(
        op = %run.operation.kind,
        dry_run = run.operation.dry_run,
        cql = %run.query.effective_cql(),
        batch_size = run.operation.batch_size,
        max_items = ?run.operation.max_items,
        "run_started"
    );
    BatchExecutor::new(run.execution_options(), cancel)
        .run(&mut selector, handler.as_mut(), checkpoint, observer)
        .await
}
