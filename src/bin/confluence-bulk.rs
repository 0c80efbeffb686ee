//! confluence-bulk CLI Binary
//!
//! Command-line interface for batched, resumable Confluence bulk operations.

use anyhow::Context;
use clap::Parser;
use confluence_bulk::cli::{map_error, Cli, RunContext, EXIT_CANCELLED, EXIT_STARTUP_FAILURE};
use confluence_bulk::config::{BulkConfig, ConfigLoader};
use confluence_bulk::error::BulkError;
use confluence_bulk::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info, warn};

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", map_error(&e));
            process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let logging_config = build_logging_config(&cli, &config);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(EXIT_STARTUP_FAILURE);
    }

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let code = runtime.block_on(async move {
        let context = RunContext::new(config);

        let cancel = context.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing the current batch");
                eprintln!("Interrupted: finishing the current batch (press Ctrl+C again to exit now)");
                cancel.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                process::exit(EXIT_CANCELLED);
            }
        });

        info!(command = ?cli.command, "confluence-bulk starting");
        let mut stdout = std::io::stdout();
        match context.execute(&cli.command, &mut stdout).await {
            Ok(code) => {
                info!(exit_code = code, "command finished");
                code
            }
            Err(e) => {
                error!("Command failed: {}", e);
                eprintln!("{}", map_error(&e));
                EXIT_STARTUP_FAILURE
            }
        }
    });

    process::exit(code);
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn load_config(cli: &Cli) -> Result<BulkConfig, BulkError> {
    let project_root = std::env::current_dir()?;
    ConfigLoader::load_with_override(&project_root, cli.config.as_deref())
}

/// Build logging configuration from the config file and CLI flags; flags win.
fn build_logging_config(cli: &Cli, config: &BulkConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();

    if cli.quiet {
        logging.enabled = false;
        return logging;
    }
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        logging.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        logging.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        logging.file = file.clone();
    }
    logging
}
