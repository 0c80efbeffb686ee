//! CLI parse: clap types for confluence-bulk. No behavior; definitions only.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

/// confluence-bulk - batched, resumable bulk operations for Confluence Cloud
#[derive(Parser, Debug)]
#[command(name = "confluence-bulk", version)]
#[command(about = "Batched, resumable bulk operations for Confluence Cloud")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (replaces the global and project config files)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a label to every matching item
    LabelAdd {
        /// Label to add
        #[arg(long)]
        label: String,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Remove a label from every matching item
    LabelRemove {
        /// Label to remove
        #[arg(long)]
        label: String,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Move every matching page under a new parent
    Move {
        /// Parent page id
        #[arg(long)]
        target: String,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Delete every matching item
    Delete {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Grant a content restriction to a user or group
    PermissionAdd {
        #[command(flatten)]
        restriction: RestrictionArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Revoke a content restriction from a user or group
    PermissionRemove {
        #[command(flatten)]
        restriction: RestrictionArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Stream matching items to a JSON Lines file
    Export {
        /// Destination file
        #[arg(long)]
        output: PathBuf,
        /// Fetch each item's storage-format body
        #[arg(long)]
        include_body: bool,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Inspect or remove stored checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

/// Which items a run targets.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// CQL predicate, e.g. 'label = "needs-review"'
    pub query: String,

    /// Restrict to one space key
    #[arg(long)]
    pub space: Option<String>,

    /// Restrict to one content type (page, blogpost, attachment, comment)
    #[arg(long = "type")]
    pub content_type: Option<String>,

    /// Items per search page (1-250)
    #[arg(long, default_value_t = 50)]
    pub page_size: u32,
}

/// How a run executes.
#[derive(Args, Debug, Clone)]
pub struct ExecutionArgs {
    /// Predict outcomes without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Items per batch (default from config, 100)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Upper bound on items processed (default 100 for mutations, unbounded for export)
    #[arg(long)]
    pub max_items: Option<u64>,

    /// Continue from the stored checkpoint of an interrupted run
    #[arg(long)]
    pub resume: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Concurrent requests within a batch (default from config, 4)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Checkpoint path (default: <checkpoint dir>/<query signature>.json)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Restriction to grant or revoke.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("principal").required(true).args(["user", "group"])))]
pub struct RestrictionArgs {
    /// Restriction operation (read or update)
    #[arg(long)]
    pub operation: String,

    /// Account id of the user
    #[arg(long)]
    pub user: Option<String>,

    /// Group name
    #[arg(long)]
    pub group: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// Print a stored checkpoint
    Show {
        path: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Remove a stored checkpoint
    Clear { path: PathBuf },
}
