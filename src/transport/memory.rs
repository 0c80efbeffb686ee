//! In-process transport backed by a fixed item list.
//!
//! Serves offline runs and tests: pagination uses `offset:<n>` cursors, every
//! entry point counts its calls, and failures can be scripted per item.

use crate::bulk::operation::{OperationDescriptor, OperationKind};
use crate::error::{ErrorKind, RemoteError};
use crate::transport::{ItemSnapshot, Page, PageRequest, SnapshotAspect, Transport};
use crate::types::{CandidateItem, ItemKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

const CURSOR_PREFIX: &str = "offset:";

#[derive(Default)]
struct MemoryState {
    snapshots: HashMap<String, ItemSnapshot>,
    deleted: HashSet<String>,
    search_failures: VecDeque<RemoteError>,
    mutate_failures: HashMap<String, VecDeque<RemoteError>>,
    permanent_failures: HashMap<String, RemoteError>,
    search_calls: usize,
    snapshot_calls: usize,
    mutate_calls: usize,
    fetch_body_calls: usize,
    mutations_by_id: HashMap<String, usize>,
}

/// Transport over an in-memory item list.
pub struct MemoryTransport {
    items: Vec<CandidateItem>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(items: Vec<CandidateItem>) -> Self {
        Self {
            items,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// `count` pages named `Page <n>` with ids `page-<n>`.
    pub fn with_pages(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|n| {
                    CandidateItem::new(format!("page-{}", n), ItemKind::Page, format!("Page {}", n))
                        .with_revision("1")
                })
                .collect(),
        )
    }

    pub fn items(&self) -> &[CandidateItem] {
        &self.items
    }

    /// Seed the remote state of one item.
    pub fn set_snapshot(&self, id: &str, snapshot: ItemSnapshot) {
        self.state.lock().snapshots.insert(id.to_string(), snapshot);
    }

    pub fn snapshot_of(&self, id: &str) -> ItemSnapshot {
        self.state.lock().snapshots.get(id).cloned().unwrap_or_default()
    }

    /// Queue failures returned by successive search calls before succeeding.
    pub fn fail_searches(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state.lock().search_failures.extend(errors);
    }

    /// Queue failures returned by successive mutations of `id` before succeeding.
    pub fn fail_mutations(&self, id: &str, errors: impl IntoIterator<Item = RemoteError>) {
        self.state
            .lock()
            .mutate_failures
            .entry(id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Make every mutation and body fetch of `id` fail with `error`.
    pub fn fail_always(&self, id: &str, error: RemoteError) {
        self.state
            .lock()
            .permanent_failures
            .insert(id.to_string(), error);
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().search_calls
    }

    pub fn snapshot_calls(&self) -> usize {
        self.state.lock().snapshot_calls
    }

    pub fn mutate_calls(&self) -> usize {
        self.state.lock().mutate_calls
    }

    pub fn fetch_body_calls(&self) -> usize {
        self.state.lock().fetch_body_calls
    }

    /// Successful mutations applied per item id.
    pub fn mutations_by_id(&self) -> HashMap<String, usize> {
        self.state.lock().mutations_by_id.clone()
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.state.lock().deleted.contains(id)
    }

    fn parse_cursor(cursor: Option<&str>) -> Result<usize, RemoteError> {
        match cursor {
            None => Ok(0),
            Some(raw) => raw
                .strip_prefix(CURSOR_PREFIX)
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    RemoteError::from_status(400, format!("invalid cursor '{}'", raw))
                }),
        }
    }

    fn take_scripted_failure(state: &mut MemoryState, id: &str) -> Option<RemoteError> {
        if let Some(err) = state.permanent_failures.get(id) {
            return Some(err.clone());
        }
        state
            .mutate_failures
            .get_mut(id)
            .and_then(|queue| queue.pop_front())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn search(&self, request: &PageRequest) -> Result<Page, RemoteError> {
        let mut state = self.state.lock();
        state.search_calls += 1;
        if let Some(err) = state.search_failures.pop_front() {
            return Err(err);
        }
        let start = Self::parse_cursor(request.cursor.as_deref())?;
        let limit = request.limit.max(1) as usize;
        let end = (start + limit).min(self.items.len());
        let items = self
            .items
            .get(start..end)
            .map(<[CandidateItem]>::to_vec)
            .unwrap_or_default();
        let next_cursor = (end < self.items.len()).then(|| format!("{}{}", CURSOR_PREFIX, end));
        Ok(Page { items, next_cursor })
    }

    async fn snapshot(
        &self,
        item: &CandidateItem,
        _aspect: SnapshotAspect,
    ) -> Result<ItemSnapshot, RemoteError> {
        let mut state = self.state.lock();
        state.snapshot_calls += 1;
        if state.deleted.contains(&item.id) {
            return Err(RemoteError::from_status(404, format!("{} not found", item.id)));
        }
        if let Some(err) = state.permanent_failures.get(&item.id) {
            return Err(err.clone());
        }
        Ok(state.snapshots.get(&item.id).cloned().unwrap_or_default())
    }

    async fn mutate(
        &self,
        item: &CandidateItem,
        operation: &OperationDescriptor,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.mutate_calls += 1;
        if let Some(err) = Self::take_scripted_failure(&mut state, &item.id) {
            return Err(err);
        }
        if state.deleted.contains(&item.id) {
            return Err(RemoteError::from_status(404, format!("{} not found", item.id)));
        }
        let invalid = |e: crate::error::BulkError| RemoteError::new(ErrorKind::Validation, e.to_string());
        match operation.kind {
            OperationKind::LabelAdd => {
                let label = operation.label().map_err(invalid)?.to_string();
                state.snapshots.entry(item.id.clone()).or_default().labels.insert(label);
            }
            OperationKind::LabelRemove => {
                let label = operation.label().map_err(invalid)?.to_string();
                state.snapshots.entry(item.id.clone()).or_default().labels.remove(&label);
            }
            OperationKind::Move => {
                let target = operation.target().map_err(invalid)?.to_string();
                state.snapshots.entry(item.id.clone()).or_default().parent_id = Some(target);
            }
            OperationKind::Delete => {
                state.deleted.insert(item.id.clone());
            }
            OperationKind::PermissionAdd | OperationKind::PermissionRemove => {
                let restriction = operation.restriction_operation().map_err(invalid)?;
                let key = operation.principal().map_err(invalid)?.snapshot_key();
                let set = state
                    .snapshots
                    .entry(item.id.clone())
                    .or_default()
                    .restrictions
                    .entry(restriction.as_str().to_string())
                    .or_default();
                if operation.kind == OperationKind::PermissionAdd {
                    set.insert(key);
                } else {
                    set.remove(&key);
                }
            }
            OperationKind::Export => {
                return Err(RemoteError::new(
                    ErrorKind::Validation,
                    "export is not a mutating operation",
                ));
            }
        }
        *state.mutations_by_id.entry(item.id.clone()).or_default() += 1;
        Ok(())
    }

    async fn fetch_body(&self, item: &CandidateItem) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.fetch_body_calls += 1;
        if let Some(err) = state.permanent_failures.get(&item.id) {
            return Err(err.clone());
        }
        Ok(format!("<p>{}</p>", item.display_name))
    }
}
