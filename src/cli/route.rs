//! CLI route: turns parsed commands into runs and renders their reports.

use crate::bulk::operation::{
    PARAM_GROUP, PARAM_INCLUDE_BODY, PARAM_LABEL, PARAM_OPERATION, PARAM_TARGET, PARAM_USER,
};
use crate::bulk::{
    run_bulk, BulkRun, CancelToken, CheckpointSettings, NoopObserver, OperationDescriptor,
    OperationKind, RunObserver, RunOutcome, RunStatus,
};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, SledCheckpointStore};
use crate::cli::confirm::{confirm_run, ConfirmDecision};
use crate::cli::output::{exit_code_with_report, EXIT_SUCCESS};
use crate::cli::parse::{
    CheckpointCommands, Commands, ExecutionArgs, RestrictionArgs, SelectionArgs,
};
use crate::config::{BulkConfig, CheckpointBackend};
use crate::error::BulkError;
use crate::export::run_export;
use crate::report::{
    render_checkpoint, render_preview, render_text, CollectingObserver, JsonLinesObserver,
    OutputFormat, PREVIEW_SAMPLE_LIMIT,
};
use crate::retry::RetryPolicy;
use crate::transport::{ConfluenceClient, Transport};
use crate::types::{ItemKind, Query, Scope};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Directory name of the sled checkpoint database inside the checkpoint dir.
const SLED_DB_DIR: &str = "checkpoints.sled";

/// Everything a command needs: configuration, injected collaborators and
/// the cancellation token wired to Ctrl+C.
pub struct RunContext {
    config: BulkConfig,
    transport: Option<Arc<dyn Transport>>,
    retry: RetryPolicy,
    cancel: CancelToken,
    interactive: bool,
}

impl RunContext {
    pub fn new(config: BulkConfig) -> Self {
        let retry = RetryPolicy::with_tokio(config.retry.clone());
        Self {
            config,
            transport: None,
            retry,
            cancel: CancelToken::new(),
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Use `transport` instead of building a Confluence client from config.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute `command`, writing reports to `out`. Returns the process exit
    /// code; `Err` means the command could not start.
    pub async fn execute(
        &self,
        command: &Commands,
        out: &mut (dyn Write + Send),
    ) -> Result<i32, BulkError> {
        match command {
            Commands::LabelAdd {
                label,
                selection,
                execution,
            } => {
                let op = OperationDescriptor::new(OperationKind::LabelAdd)
                    .with_param(PARAM_LABEL, label.as_str());
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::LabelRemove {
                label,
                selection,
                execution,
            } => {
                let op = OperationDescriptor::new(OperationKind::LabelRemove)
                    .with_param(PARAM_LABEL, label.as_str());
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::Move {
                target,
                selection,
                execution,
            } => {
                let op = OperationDescriptor::new(OperationKind::Move)
                    .with_param(PARAM_TARGET, target.as_str());
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::Delete {
                selection,
                execution,
            } => {
                let op = OperationDescriptor::new(OperationKind::Delete);
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::PermissionAdd {
                restriction,
                selection,
                execution,
            } => {
                let op = restriction_operation(OperationKind::PermissionAdd, restriction);
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::PermissionRemove {
                restriction,
                selection,
                execution,
            } => {
                let op = restriction_operation(OperationKind::PermissionRemove, restriction);
                self.handle_mutation(op, selection, execution, out).await
            }
            Commands::Export {
                output,
                include_body,
                selection,
                execution,
            } => {
                let mut op = OperationDescriptor::new(OperationKind::Export);
                if *include_body {
                    op = op.with_param(PARAM_INCLUDE_BODY, "true");
                }
                self.handle_export(op, output, selection, execution, out).await
            }
            Commands::Checkpoint { command } => self.handle_checkpoint(command, out),
        }
    }

    async fn handle_mutation(
        &self,
        op: OperationDescriptor,
        selection: &SelectionArgs,
        execution: &ExecutionArgs,
        out: &mut (dyn Write + Send),
    ) -> Result<i32, BulkError> {
        let format: OutputFormat = execution.format.parse()?;
        let run = self.build_run(op, selection, execution)?;
        run.operation.validate()?;
        run.query.validate()?;
        let transport = self.transport()?;

        let operation = run.operation.clone();
        if !operation.dry_run {
            if let Some(cancelled) = self.preview_and_confirm(&transport, &run, execution.yes).await? {
                let report = write_report(format, &operation, &cancelled, out);
                return Ok(exit_code_with_report(&cancelled, report));
            }
        }

        let (outcome, report) = match format {
            OutputFormat::Json => {
                let mut observer = JsonLinesObserver::new(&mut *out);
                let outcome = run_bulk(
                    transport,
                    self.retry.clone(),
                    run,
                    self.cancel.clone(),
                    &mut observer,
                )
                .await?;
                let report = observer.finish(&operation, &outcome).map(|_| ());
                (outcome, report)
            }
            OutputFormat::Text => {
                let outcome = run_bulk(
                    transport,
                    self.retry.clone(),
                    run,
                    self.cancel.clone(),
                    &mut NoopObserver,
                )
                .await?;
                let report = write_report(format, &operation, &outcome, out);
                (outcome, report)
            }
        };
        Ok(exit_code_with_report(&outcome, report))
    }

    /// Dry-run preview before a real run; destructive operations always show
    /// it. Asks for confirmation when required. Returns the preview outcome
    /// when the preview itself was cancelled, in which case nothing runs.
    async fn preview_and_confirm(
        &self,
        transport: &Arc<dyn Transport>,
        run: &BulkRun,
        yes: bool,
    ) -> Result<Option<RunOutcome>, BulkError> {
        let destructive = run.operation.kind.is_destructive();
        if yes && !destructive {
            return Ok(None);
        }

        let mut collector = CollectingObserver::new(PREVIEW_SAMPLE_LIMIT);
        let preview = run_bulk(
            Arc::clone(transport),
            self.retry.clone(),
            run.as_preview(),
            self.cancel.clone(),
            &mut collector,
        )
        .await?;
        if preview.status == RunStatus::Cancelled {
            info!(batches = preview.batches, "preview cancelled; nothing was changed");
            return Ok(Some(preview));
        }
        eprintln!(
            "{}",
            render_preview(&run.operation, &preview, collector.results())
        );

        let predicted = preview.summary.succeeded;
        let threshold = self.config.execution.confirm_threshold;
        match confirm_run(&run.operation, predicted, threshold, yes, self.interactive)? {
            ConfirmDecision::Proceed => Ok(None),
            ConfirmDecision::Declined => Err(BulkError::ConfirmationDeclined),
        }
    }

    async fn handle_export(
        &self,
        op: OperationDescriptor,
        output: &Path,
        selection: &SelectionArgs,
        execution: &ExecutionArgs,
        out: &mut (dyn Write + Send),
    ) -> Result<i32, BulkError> {
        let format: OutputFormat = execution.format.parse()?;
        let run = self.build_run(op, selection, execution)?;
        let transport = self.transport()?;
        let operation = run.operation.clone();

        let (outcome, report) = match format {
            OutputFormat::Json => {
                let mut observer = JsonLinesObserver::new(&mut *out);
                let outcome = self
                    .export_with(transport, run, output, &mut observer)
                    .await?;
                let report = observer.finish(&operation, &outcome).map(|_| ());
                (outcome, report)
            }
            OutputFormat::Text => {
                let outcome = self
                    .export_with(transport, run, output, &mut NoopObserver)
                    .await?;
                let mut report = write_report(format, &operation, &outcome, out);
                if report.is_ok() && !outcome.summary.dry_run {
                    report = writeln!(out, "  Output:    {}", output.display()).map_err(BulkError::from);
                }
                (outcome, report)
            }
        };
        Ok(exit_code_with_report(&outcome, report))
    }

    async fn export_with(
        &self,
        transport: Arc<dyn Transport>,
        run: BulkRun,
        output: &Path,
        observer: &mut dyn RunObserver,
    ) -> Result<RunOutcome, BulkError> {
        run_export(
            transport,
            self.retry.clone(),
            run,
            output,
            self.cancel.clone(),
            observer,
        )
        .await
    }

    fn handle_checkpoint(
        &self,
        command: &CheckpointCommands,
        out: &mut (dyn Write + Send),
    ) -> Result<i32, BulkError> {
        let store = self.checkpoint_store()?;
        match command {
            CheckpointCommands::Show { path, format } => {
                let format: OutputFormat = format.parse()?;
                let checkpoint = store.load(path)?.ok_or_else(|| {
                    BulkError::Validation(format!("no checkpoint at {}", path.display()))
                })?;
                writeln!(out, "{}", render_checkpoint(path, &checkpoint, format)?)?;
            }
            CheckpointCommands::Clear { path } => {
                store.remove(path)?;
                info!(path = %path.display(), "checkpoint cleared");
                writeln!(out, "Removed checkpoint {}", path.display())?;
            }
        }
        Ok(EXIT_SUCCESS)
    }

    fn build_run(
        &self,
        op: OperationDescriptor,
        selection: &SelectionArgs,
        execution: &ExecutionArgs,
    ) -> Result<BulkRun, BulkError> {
        let defaults = &self.config.execution;
        let max_items = match execution.max_items {
            Some(max) => Some(max),
            None if op.kind.is_mutating() => Some(defaults.max_items),
            None => None,
        };
        let op = op
            .with_dry_run(execution.dry_run)
            .with_batch_size(execution.batch_size.unwrap_or(defaults.batch_size))
            .with_max_items(max_items);

        let content_type = selection
            .content_type
            .as_deref()
            .map(str::parse::<ItemKind>)
            .transpose()?;
        let query = Query::new(
            selection.query.clone(),
            Scope {
                space: selection.space.clone(),
                content_type,
                page_size: selection.page_size,
            },
        );

        let checkpoint = CheckpointSettings {
            store: self.checkpoint_store()?,
            dir: self.config.checkpoint.resolved_dir(),
            path: execution.checkpoint.clone(),
            resume: execution.resume,
        };
        debug!(op = %op.kind, checkpoint_dir = %checkpoint.dir.display(), "run configured");

        let mut run = BulkRun::new(query, op)
            .with_workers(execution.workers.unwrap_or(defaults.workers))
            .with_checkpoint(Some(checkpoint));
        run.failure_report_limit = defaults.failure_report_limit;
        Ok(run)
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, BulkError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        let confluence = &self.config.confluence;
        let (base_url, credentials) = confluence.resolve().map_err(|missing| {
            BulkError::ConfigError(format!("missing settings: {}", missing.join(", ")))
        })?;
        let client = ConfluenceClient::with_timeouts(
            &base_url,
            credentials,
            confluence.connect_timeout(),
            confluence.request_timeout(),
        )?;
        Ok(Arc::new(client))
    }

    fn checkpoint_store(&self) -> Result<Arc<dyn CheckpointStore>, BulkError> {
        match self.config.checkpoint.backend {
            CheckpointBackend::File => Ok(Arc::new(FileCheckpointStore::new())),
            CheckpointBackend::Sled => {
                let db_path: PathBuf = self.config.checkpoint.resolved_dir().join(SLED_DB_DIR);
                Ok(Arc::new(SledCheckpointStore::open(&db_path)?))
            }
        }
    }
}

fn restriction_operation(kind: OperationKind, args: &RestrictionArgs) -> OperationDescriptor {
    let mut op = OperationDescriptor::new(kind).with_param(PARAM_OPERATION, args.operation.as_str());
    if let Some(user) = &args.user {
        op = op.with_param(PARAM_USER, user.as_str());
    }
    if let Some(group) = &args.group {
        op = op.with_param(PARAM_GROUP, group.as_str());
    }
    op
}

/// Render a finished run's report in `format`.
fn write_report(
    format: OutputFormat,
    operation: &OperationDescriptor,
    outcome: &RunOutcome,
    out: &mut (dyn Write + Send),
) -> Result<(), BulkError> {
    match format {
        OutputFormat::Json => JsonLinesObserver::new(out).finish(operation, outcome).map(|_| ()),
        OutputFormat::Text => {
            write!(out, "{}", render_text(operation, outcome))?;
            Ok(())
        }
    }
}

