//! Dry-run simulator: predicts each item's outcome without mutating anything.
//!
//! Operations whose effect depends on current state (labels, parent,
//! restrictions) are predicted from a read-only lookup; items where the
//! operation would change nothing are reported as skipped.

use crate::bulk::executor::BatchHandler;
use crate::bulk::operation::{OperationDescriptor, Prediction};
use crate::error::BulkError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::types::{CandidateItem, ItemResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::debug;

pub struct DryRunSimulator {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    operation: OperationDescriptor,
    workers: usize,
}

impl DryRunSimulator {
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        operation: OperationDescriptor,
        workers: usize,
    ) -> Self {
        Self {
            transport,
            retry,
            operation,
            workers: workers.max(1),
        }
    }

    async fn predict_item(&self, item: &CandidateItem) -> ItemResult {
        let snapshot = match self.operation.kind.lookup_aspect() {
            Some(aspect) => {
                let lookup = self
                    .retry
                    .execute(|| self.transport.snapshot(item, aspect))
                    .await;
                match lookup {
                    Ok(snapshot) => Some(snapshot),
                    Err(err) => {
                        return ItemResult::failed(item, err.kind, err.message).predicted();
                    }
                }
            }
            None => None,
        };
        match self.operation.predict(item, snapshot.as_ref()) {
            Prediction::WouldApply(message) => {
                debug!(id = %item.id, %message, "predicted");
                ItemResult::success(item, Some(message)).predicted()
            }
            Prediction::NoOp(message) => {
                debug!(id = %item.id, %message, "predicted_noop");
                ItemResult::skipped(item, message).predicted()
            }
        }
    }
}

#[async_trait]
impl BatchHandler for DryRunSimulator {
    fn is_dry_run(&self) -> bool {
        true
    }

    async fn handle_batch(&mut self, batch: &[CandidateItem]) -> Result<Vec<ItemResult>, BulkError> {
        let this = &*self;
        let pending: Vec<_> = batch.iter().map(|item| this.predict_item(item)).collect();
        Ok(stream::iter(pending)
            .buffered(this.workers)
            .collect()
            .await)
    }
}
