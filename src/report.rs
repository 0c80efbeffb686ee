//! Run reports: JSON Lines records streamed per item plus a trailing summary,
//! or a human-readable summary with a failures table.

use crate::aggregate::RunSummary;
use crate::bulk::executor::{RunObserver, RunOutcome, RunStatus};
use crate::bulk::operation::OperationDescriptor;
use crate::checkpoint::Checkpoint;
use crate::error::BulkError;
use crate::types::{ItemResult, ItemStatus};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Items listed in a dry-run preview before the rest are summarised.
pub const PREVIEW_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(BulkError::Validation(format!(
                "unknown output format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Item(&'a ItemResult),
    Summary(SummaryRecord<'a>),
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    operation: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(flatten)]
    summary: &'a RunSummary,
    batches: u64,
    checkpoint_commits: u64,
    resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<String>,
}

fn encode(record: &Record<'_>) -> Result<String, BulkError> {
    serde_json::to_string(record).map_err(|e| BulkError::Output(format!("failed to encode report: {}", e)))
}

/// One `{"type":"item",...}` line.
pub fn item_line(result: &ItemResult) -> Result<String, BulkError> {
    encode(&Record::Item(result))
}

/// The trailing `{"type":"summary",...}` line.
pub fn summary_line(operation: &OperationDescriptor, outcome: &RunOutcome) -> Result<String, BulkError> {
    encode(&Record::Summary(SummaryRecord {
        operation: operation.kind.as_str(),
        status: outcome.status.as_str(),
        error: outcome.status.error(),
        summary: &outcome.summary,
        batches: outcome.batches,
        checkpoint_commits: outcome.checkpoint_commits,
        resumed: outcome.resumed,
        checkpoint: kept_checkpoint(outcome).map(|p| p.display().to_string()),
    }))
}

/// Checkpoint left behind for a later `--resume`, if any.
fn kept_checkpoint(outcome: &RunOutcome) -> Option<&Path> {
    if outcome.status == RunStatus::Completed || outcome.summary.dry_run {
        return None;
    }
    outcome.checkpoint_path.as_deref()
}

/// Streams each item result as a JSON line as soon as it is recorded.
pub struct JsonLinesObserver<W: Write + Send> {
    out: W,
    error: Option<BulkError>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    /// Write the summary line and surface the first write error, if any.
    pub fn finish(mut self, operation: &OperationDescriptor, outcome: &RunOutcome) -> Result<W, BulkError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let line = summary_line(operation, outcome)?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn write(&mut self, line: Result<String, BulkError>) -> Result<(), BulkError> {
        let line = line?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }
}

impl<W: Write + Send> RunObserver for JsonLinesObserver<W> {
    fn on_item(&mut self, result: &ItemResult) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.write(item_line(result)) {
            self.error = Some(err);
        }
    }
}

/// Keeps the first `limit` item results, for previews.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    limit: usize,
    results: Vec<ItemResult>,
}

impl CollectingObserver {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            results: Vec::new(),
        }
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }
}

impl RunObserver for CollectingObserver {
    fn on_item(&mut self, result: &ItemResult) {
        if self.results.len() < self.limit {
            self.results.push(result.clone());
        }
    }
}

fn heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn status_label(status: ItemStatus) -> String {
    match status {
        ItemStatus::Success => format!("{}", "success".green()),
        ItemStatus::Failed => format!("{}", "failed".red()),
        ItemStatus::Skipped => format!("{}", "skipped".yellow()),
    }
}

fn failures_table(failures: &[ItemResult]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["ID", "Title", "Kind", "Message"]);
    for failure in failures {
        table.add_row(vec![
            failure.item_id.clone(),
            failure.display_name.clone(),
            failure
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string()),
            failure.message.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// Human-readable run summary.
pub fn render_text(operation: &OperationDescriptor, outcome: &RunOutcome) -> String {
    let summary = &outcome.summary;
    let mut out = String::new();
    let title = if summary.dry_run {
        format!("Dry run: {}", operation.describe())
    } else {
        format!("Run: {}", operation.describe())
    };
    out.push_str(&format!("{}\n\n", heading(&title)));

    let status = match &outcome.status {
        RunStatus::Completed => format!("{}", "completed".green()),
        RunStatus::MaxItemsReached => format!("{}", "stopped at max items".yellow()),
        RunStatus::Cancelled => format!("{}", "cancelled".yellow()),
        RunStatus::Aborted { error } => format!("{} ({})", "aborted".red(), error),
    };
    out.push_str(&format!("  Status:    {}\n", status));
    let verb = if summary.dry_run { "Would succeed" } else { "Succeeded" };
    out.push_str(&format!("  Total:     {}\n", summary.total));
    out.push_str(&format!("  {:<10} {}\n", format!("{}:", verb), summary.succeeded));
    out.push_str(&format!("  Failed:    {}\n", summary.failed));
    out.push_str(&format!("  Skipped:   {}\n", summary.skipped));
    if summary.already_processed > 0 {
        out.push_str(&format!("  Already processed: {}\n", summary.already_processed));
    }
    out.push_str(&format!("  Batches:   {}\n", outcome.batches));
    if outcome.resumed {
        out.push_str("  Resumed from checkpoint\n");
    }
    if let Some(path) = kept_checkpoint(outcome) {
        out.push_str(&format!(
            "  Checkpoint: {} (rerun with --resume to continue)\n",
            path.display()
        ));
    }

    if !summary.failures.is_empty() {
        out.push_str(&format!("\n{}\n\n", heading("Failures")));
        out.push_str(&format!("{}\n", failures_table(&summary.failures)));
        if summary.failures_omitted > 0 {
            out.push_str(&format!("  ... and {} more failures\n", summary.failures_omitted));
        }
    }
    out
}

/// Dry-run preview shown before a confirmed real run.
pub fn render_preview(operation: &OperationDescriptor, outcome: &RunOutcome, sample: &[ItemResult]) -> String {
    let summary = &outcome.summary;
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", heading(&format!("Preview: {}", operation.describe()))));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["ID", "Title", "Predicted", "Detail"]);
    for result in sample {
        table.add_row(vec![
            result.item_id.clone(),
            result.display_name.clone(),
            status_label(result.status),
            result.message.clone().unwrap_or_default(),
        ]);
    }
    out.push_str(&format!("{}\n", table));
    if summary.total > sample.len() as u64 {
        out.push_str(&format!("  ... and {} more items\n", summary.total - sample.len() as u64));
    }
    out.push_str(&format!(
        "\n  {} would change, {} unchanged, {} failed lookups",
        summary.succeeded, summary.skipped, summary.failed
    ));
    if outcome.status == RunStatus::MaxItemsReached {
        out.push_str(" (limited by --max-items)");
    }
    out.push('\n');
    out
}

/// Stored checkpoint, for `checkpoint show`.
pub fn render_checkpoint(path: &Path, checkpoint: &Checkpoint, format: OutputFormat) -> Result<String, BulkError> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(checkpoint)
            .map_err(|e| BulkError::Output(format!("failed to encode checkpoint: {}", e)));
    }
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", heading(&format!("Checkpoint {}", path.display()))));
    out.push_str(&format!("  Format version:  {}\n", checkpoint.format_version));
    out.push_str(&format!("  Query signature: {}\n", checkpoint.query_signature));
    out.push_str(&format!(
        "  Cursor:          {}\n",
        checkpoint.cursor.as_deref().unwrap_or("(start)")
    ));
    out.push_str(&format!("  Processed items: {}\n", checkpoint.processed_ids.len()));
    out.push_str(&format!("  Output offset:   {}\n", checkpoint.output_offset));
    if let Some(destination) = &checkpoint.destination {
        out.push_str(&format!("  Destination:     {}\n", destination));
    }
    out.push_str(&format!("  Commits:         {}\n", checkpoint.commits));
    out.push_str(&format!("  Created:         {}\n", checkpoint.created_at.to_rfc3339()));
    out.push_str(&format!("  Updated:         {}\n", checkpoint.updated_at.to_rfc3339()));
    Ok(out)
}
