//! Outcome Aggregator: per-item results folded into a run summary.

use crate::types::{ItemResult, ItemStatus};
use serde::{Deserialize, Serialize};

/// Aggregate report of a completed or in-progress run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Items re-yielded after a resume whose ids were already committed.
    pub already_processed: u64,
    /// Failures beyond the reporting cap (counted, not listed).
    pub failures_omitted: u64,
    pub failures: Vec<ItemResult>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Additive accumulator of item results.
#[derive(Debug, Clone)]
pub struct OutcomeAggregator {
    summary: RunSummary,
    failure_limit: usize,
}

impl OutcomeAggregator {
    pub const DEFAULT_FAILURE_LIMIT: usize = 100;

    pub fn new(dry_run: bool, failure_limit: usize) -> Self {
        Self {
            summary: RunSummary {
                dry_run,
                ..RunSummary::default()
            },
            failure_limit,
        }
    }

    pub fn record(&mut self, result: &ItemResult) {
        self.summary.total += 1;
        match result.status {
            ItemStatus::Success => self.summary.succeeded += 1,
            ItemStatus::Skipped => self.summary.skipped += 1,
            ItemStatus::Failed => {
                self.summary.failed += 1;
                if self.summary.failures.len() < self.failure_limit {
                    self.summary.failures.push(result.clone());
                } else {
                    self.summary.failures_omitted += 1;
                }
            }
        }
    }

    pub fn record_already_processed(&mut self) {
        self.summary.already_processed += 1;
    }

    pub fn total(&self) -> u64 {
        self.summary.total
    }

    /// Snapshot of the counts so far. Safe to call repeatedly.
    pub fn summarize(&self) -> RunSummary {
        self.summary.clone()
    }
}
