//! Real-run handler: applies the operation to each item of a batch with a
//! bounded number of in-flight requests.

use crate::bulk::executor::BatchHandler;
use crate::bulk::operation::OperationDescriptor;
use crate::error::BulkError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::types::{CandidateItem, ItemResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MutationHandler {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    operation: OperationDescriptor,
    workers: usize,
}

impl MutationHandler {
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

    async fn apply(&self, item: &CandidateItem) -> ItemResult {
        let outcome = self
            .retry
            .execute(|| self.transport.mutate(item, &self.operation))
            .await;
        match outcome {
            Ok(()) => {
                debug!(id = %item.id, op = %self.operation.kind, "item_applied");
                ItemResult::success(item, Some(self.operation.describe()))
            }
            Err(err) => {
                warn!(id = %item.id, op = %self.operation.kind, kind = %err.kind, error = %err.message, "item_failed");
                ItemResult::failed(item, err.kind, err.message)
            }
        }
    }
}

#[async_trait]
impl BatchHandler for MutationHandler {
    fn is_dry_run(&self) -> bool {
        false
    }

    async fn handle_batch(&mut self, batch: &[CandidateItem]) -> Result<Vec<ItemResult>, BulkError> {
        let this = &*self;
        let pending: Vec<_> = batch.iter().map(|item| this.apply(item)).collect();
        let results = stream::iter(pending)
            .buffer_unordered(this.workers)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }
}
