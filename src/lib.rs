//! confluence-bulk: batched, resumable bulk operations for Confluence Cloud
//!
//! Resolves a CQL query into a paginated candidate set, previews or applies
//! an operation across it in bounded batches, retries only transient remote
//! failures, records every item's outcome without aborting the run, and
//! checkpoints progress so interrupted runs can resume.

pub mod aggregate;
pub mod bulk;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod report;
pub mod retry;
pub mod selector;
pub mod transport;
pub mod types;
