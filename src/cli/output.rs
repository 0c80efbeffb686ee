//! CLI output: error mapping and process exit codes.

use crate::bulk::{RunOutcome, RunStatus};
use crate::error::BulkError;
use tracing::warn;

/// Every item succeeded or was skipped.
pub const EXIT_SUCCESS: i32 = 0;
/// One or more items failed, or the run aborted after some batches.
pub const EXIT_ITEM_FAILURES: i32 = 1;
/// The run could not start.
pub const EXIT_STARTUP_FAILURE: i32 = 2;
/// Cancelled by the operator.
pub const EXIT_CANCELLED: i32 = 130;

/// Map run-level errors to the message shown to the operator.
pub fn map_error(e: &BulkError) -> String {
    match e {
        BulkError::SignatureMismatch { .. } => format!(
            "{}\nThe checkpoint belongs to a different query or operation; rerun without --resume or pass another --checkpoint.",
            e
        ),
        _ => e.to_string(),
    }
}

pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome.status {
        RunStatus::Cancelled => EXIT_CANCELLED,
        RunStatus::Aborted { .. } => EXIT_ITEM_FAILURES,
        RunStatus::Completed | RunStatus::MaxItemsReached if outcome.summary.failed > 0 => {
            EXIT_ITEM_FAILURES
        }
        RunStatus::Completed | RunStatus::MaxItemsReached => EXIT_SUCCESS,
    }
}

/// Exit code for a finished run whose report may have failed to write. The
/// run has already taken effect, so a report failure is never a startup
/// failure.
pub fn exit_code_with_report(outcome: &RunOutcome, report: Result<(), BulkError>) -> i32 {
    let code = exit_code(outcome);
    match report {
        Ok(()) => code,
        Err(err) => {
            warn!(error = %err, status = outcome.status.as_str(), "failed to write run report");
            if code == EXIT_SUCCESS {
                EXIT_ITEM_FAILURES
            } else {
                code
            }
        }
    }
}
