//! Batch executor: drives a selector through a batch handler, one bounded
//! batch at a time, committing a checkpoint after every batch.
//! Per-item failures are recorded by handlers and never stop the run.

use crate::aggregate::{OutcomeAggregator, RunSummary};
use crate::checkpoint::{load_for_resume, Checkpoint, CheckpointStore};
use crate::error::{BulkError, RemoteError};
use crate::selector::ResourceSelector;
use crate::types::{CandidateItem, ItemResult};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Processes one batch of candidates. Implementations record a failure per
/// item instead of returning an error; `Err` is reserved for run-level
/// failures such as an unwritable destination.
#[async_trait]
pub trait BatchHandler: Send {
    /// Dry-run handlers never mutate and never cause checkpoint writes.
    fn is_dry_run(&self) -> bool;

    /// Process every item of `batch`, returning exactly one result per item.
    async fn handle_batch(&mut self, batch: &[CandidateItem]) -> Result<Vec<ItemResult>, BulkError>;

    /// Make the effects of processed batches durable. Returns the committed
    /// output offset recorded in the checkpoint.
    async fn flush(&mut self) -> Result<u64, BulkError> {
        Ok(0)
    }
}

/// Receives progress as the run advances.
pub trait RunObserver: Send {
    fn on_item(&mut self, _result: &ItemResult) {}
    fn on_batch_committed(&mut self, _commit: &BatchCommit) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Progress record emitted after each batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchCommit {
    pub batch_index: u64,
    pub items: usize,
    pub processed_total: u64,
    pub checkpointed: bool,
}

/// Cooperative cancellation flag, honoured between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub batch_size: usize,
    pub max_items: Option<u64>,
    pub failure_report_limit: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_items: None,
            failure_report_limit: OutcomeAggregator::DEFAULT_FAILURE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The candidate sequence was exhausted.
    Completed,
    /// `max_items` stopped the run before the sequence ended.
    MaxItemsReached,
    /// The operator cancelled between batches.
    Cancelled,
    /// A run-level failure after at least one batch; the summary is partial.
    Aborted { error: String },
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::MaxItemsReached => "max_items_reached",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Aborted { .. } => "aborted",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunStatus::Aborted { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: RunSummary,
    pub batches: u64,
    pub checkpoint_commits: u64,
    /// Whether the run continued from a stored checkpoint.
    pub resumed: bool,
    pub checkpoint_path: Option<PathBuf>,
}

/// Checkpoint bound to one run: the store, where it lives, and its state.
pub struct ActiveCheckpoint {
    store: Arc<dyn CheckpointStore>,
    path: PathBuf,
    state: Checkpoint,
    resumed: bool,
}

impl ActiveCheckpoint {
    /// Open the checkpoint for a run. With `resume`, a stored checkpoint
    /// must match `signature`; a missing one starts from the beginning.
    pub fn open(
        store: Arc<dyn CheckpointStore>,
        path: impl Into<PathBuf>,
        signature: &str,
        resume: bool,
    ) -> Result<Self, BulkError> {
        let path = path.into();
        let stored = if resume {
            load_for_resume(store.as_ref(), &path, signature)?
        } else {
            None
        };
        let resumed = stored.is_some();
        if resume && !resumed {
            info!(path = %path.display(), "no checkpoint found; starting from the beginning");
        }
        Ok(Self {
            store,
            path,
            state: stored.unwrap_or_else(|| Checkpoint::new(signature)),
            resumed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &Checkpoint {
        &self.state
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Cursor the selector restarts from.
    pub fn cursor(&self) -> Option<String> {
        self.state.cursor.clone()
    }

    /// Tie the checkpoint to an export destination. A resumed checkpoint
    /// recorded for another destination is refused before anything is
    /// written.
    pub fn bind_destination(&mut self, destination: &str) -> Result<(), BulkError> {
        match self.state.destination.as_deref() {
            Some(recorded) if self.resumed && recorded != destination => {
                Err(BulkError::Validation(format!(
                    "checkpoint {} belongs to export destination {}, not {}",
                    self.path.display(),
                    recorded,
                    destination
                )))
            }
            _ => {
                self.state.destination = Some(destination.to_string());
                Ok(())
            }
        }
    }

    fn commit<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        cursor: Option<String>,
        output_offset: u64,
    ) -> Result<(), BulkError> {
        self.state.advance(ids, cursor, output_offset);
        self.store.save(&self.path, &self.state)?;
        Ok(())
    }

    fn finish(&self) -> Result<(), BulkError> {
        self.store.remove(&self.path)?;
        Ok(())
    }
}

/// Sequential batch driver.
pub struct BatchExecutor {
    options: ExecutionOptions,
    cancel: CancelToken,
}

impl BatchExecutor {
    pub fn new(options: ExecutionOptions, cancel: CancelToken) -> Self {
        Self { options, cancel }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Run `handler` over the selector's sequence. Returns `Err` only when the
    /// run fails before any batch was processed.
    pub async fn run(
        &self,
        selector: &mut ResourceSelector,
        handler: &mut dyn BatchHandler,
        mut checkpoint: Option<ActiveCheckpoint>,
        observer: &mut dyn RunObserver,
    ) -> Result<RunOutcome, BulkError> {
        if self.options.batch_size == 0 {
            return Err(BulkError::Validation(
                "batch size must be at least 1".to_string(),
            ));
        }
        let dry_run = handler.is_dry_run();
        let mut aggregator = OutcomeAggregator::new(dry_run, self.options.failure_report_limit);
        let resumed = checkpoint.as_ref().map(|c| c.is_resumed()).unwrap_or(false);
        let mut processed: HashSet<String> = checkpoint
            .as_ref()
            .map(|c| c.state().processed_ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut batches = 0u64;
        let mut commits = 0u64;

        let status = loop {
            if self.cancel.is_cancelled() {
                info!(batches, "run cancelled between batches");
                break RunStatus::Cancelled;
            }

            let remaining = self
                .options
                .max_items
                .map(|max| max.saturating_sub(aggregator.total()));
            if remaining == Some(0) {
                break if selector.is_exhausted() {
                    RunStatus::Completed
                } else {
                    RunStatus::MaxItemsReached
                };
            }
            let want = remaining
                .map(|r| r.min(self.options.batch_size as u64) as usize)
                .unwrap_or(self.options.batch_size);

            let (batch, fetch_error) =
                fill_batch(selector, want, &processed, &mut aggregator).await;

            if batch.is_empty() {
                match fetch_error {
                    None => break RunStatus::Completed,
                    Some(err) if batches == 0 => return Err(BulkError::Remote(err)),
                    Some(err) => {
                        warn!(error = %err, "selector failed mid-run");
                        break RunStatus::Aborted {
                            error: err.to_string(),
                        };
                    }
                }
            }

            let results = match handler.handle_batch(&batch).await {
                Ok(results) => results,
                Err(err) if batches == 0 => return Err(err),
                Err(err) => {
                    warn!(error = %err, "batch handler failed mid-run");
                    break RunStatus::Aborted {
                        error: err.to_string(),
                    };
                }
            };
            debug_assert_eq!(results.len(), batch.len());
            for result in &results {
                aggregator.record(result);
                observer.on_item(result);
            }
            processed.extend(batch.iter().map(|item| item.id.clone()));

            let mut checkpointed = false;
            if !dry_run {
                let committed = match handler.flush().await {
                    Ok(offset) => match checkpoint.as_mut() {
                        Some(active) => active
                            .commit(
                                batch.iter().map(|item| item.id.as_str()),
                                selector.resume_cursor(),
                                offset,
                            )
                            .map(|_| true),
                        None => Ok(false),
                    },
                    Err(err) => Err(err),
                };
                match committed {
                    Ok(saved) => {
                        checkpointed = saved;
                        if saved {
                            commits += 1;
                        }
                    }
                    Err(err) => {
                        batches += 1;
                        warn!(error = %err, "failed to commit batch");
                        break RunStatus::Aborted {
                            error: err.to_string(),
                        };
                    }
                }
            }

            batches += 1;
            let commit = BatchCommit {
                batch_index: batches,
                items: batch.len(),
                processed_total: aggregator.total(),
                checkpointed,
            };
            info!(
                batch = commit.batch_index,
                items = commit.items,
                processed = commit.processed_total,
                checkpointed,
                "batch_committed"
            );
            observer.on_batch_committed(&commit);

            if let Some(err) = fetch_error {
                warn!(error = %err, "selector failed mid-run");
                break RunStatus::Aborted {
                    error: err.to_string(),
                };
            }
        };

        if status == RunStatus::Completed && !dry_run {
            if let Some(active) = checkpoint.as_ref() {
                active.finish()?;
                debug!(path = %active.path().display(), "checkpoint removed after completed run");
            }
        }

        let summary = aggregator.summarize();
        info!(
            status = ?status,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "run_finished"
        );
        Ok(RunOutcome {
            status,
            summary,
            batches,
            checkpoint_commits: commits,
            resumed,
            checkpoint_path: checkpoint.map(|c| c.path).filter(|_| commits > 0 || resumed),
        })
    }
}

/// Draw up to `want` unprocessed items. Items already processed are counted
/// and dropped. A fetch failure is returned alongside the items drawn so far.
async fn fill_batch(
    selector: &mut ResourceSelector,
    want: usize,
    processed: &HashSet<String>,
    aggregator: &mut OutcomeAggregator,
) -> (Vec<CandidateItem>, Option<RemoteError>) {
    let mut batch: Vec<CandidateItem> = Vec::with_capacity(want);
    let mut in_batch: HashSet<String> = HashSet::new();
    while batch.len() < want {
        match selector.next_item().await {
            Ok(Some(item)) => {
                if processed.contains(&item.id) || in_batch.contains(&item.id) {
                    debug!(id = %item.id, "skipping already processed item");
                    aggregator.record_already_processed();
                    continue;
                }
                in_batch.insert(item.id.clone());
                batch.push(item);
            }
            Ok(None) => break,
            Err(err) => return (batch, Some(err)),
        }
    }
    (batch, None)
}
