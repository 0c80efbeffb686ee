//! Confirmation gate for real runs.

use crate::bulk::OperationDescriptor;
use crate::error::BulkError;
use dialoguer::Confirm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Proceed,
    Declined,
}

/// Whether a real run must be confirmed: destructive operations always,
/// others once the predicted change count exceeds `threshold`.
pub fn requires_confirmation(operation: &OperationDescriptor, predicted: u64, threshold: u64) -> bool {
    operation.kind.is_destructive() || predicted > threshold
}

/// Decide whether to go ahead, prompting on an interactive terminal.
/// Without a terminal, a required confirmation is a validation error.
pub fn confirm_run(
    operation: &OperationDescriptor,
    predicted: u64,
    threshold: u64,
    yes: bool,
    interactive: bool,
) -> Result<ConfirmDecision, BulkError> {
    if yes || !requires_confirmation(operation, predicted, threshold) {
        return Ok(ConfirmDecision::Proceed);
    }
    if !interactive {
        return Err(BulkError::Validation(format!(
            "{} on {} items needs confirmation; rerun with --yes",
            operation.kind, predicted
        )));
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("{} on {} items?", operation.describe(), predicted))
        .default(false)
        .interact()
        .map_err(|e| BulkError::Output(format!("Failed to get user input: {}", e)))?;
    Ok(if confirmed {
        ConfirmDecision::Proceed
    } else {
        ConfirmDecision::Declined
    })
}
