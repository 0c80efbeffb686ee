//! Transport Abstraction
//!
//! A transport issues exactly one remote request per call and reports a typed
//! outcome. It carries no retry or business logic; callers wrap calls in a
//! [`crate::retry::RetryPolicy`].

use crate::bulk::operation::OperationDescriptor;
use crate::error::RemoteError;
use crate::types::CandidateItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod http;
pub mod memory;

pub use http::{ConfluenceClient, ConfluenceCredentials};
pub use memory::MemoryTransport;

/// One page request of a paginated search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cql: String,
    pub cursor: Option<String>,
    pub limit: u32,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<CandidateItem>,
    /// Continuation cursor; `None` marks the end of the sequence.
    pub next_cursor: Option<String>,
}

/// Which part of an item's state a read-only lookup fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotAspect {
    Labels,
    Parent,
    Restrictions,
}

/// Read-only view of the item state an operation depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub labels: BTreeSet<String>,
    pub parent_id: Option<String>,
    /// Restriction operation ("read"/"update") to principal keys
    /// (`user:<accountId>` or `group:<name>`).
    pub restrictions: BTreeMap<String, BTreeSet<String>>,
}

/// Remote service interface used by the selector and the batch handlers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch one page of items matching a predicate.
    async fn search(&self, request: &PageRequest) -> Result<Page, RemoteError>;

    /// Read-only lookup of the state relevant to an operation.
    async fn snapshot(
        &self,
        item: &CandidateItem,
        aspect: SnapshotAspect,
    ) -> Result<ItemSnapshot, RemoteError>;

    /// Apply a mutating operation to one item. The only mutating entry point.
    async fn mutate(
        &self,
        item: &CandidateItem,
        operation: &OperationDescriptor,
    ) -> Result<(), RemoteError>;

    /// Fetch an item's storage-format body for export.
    async fn fetch_body(&self, item: &CandidateItem) -> Result<String, RemoteError>;
}
