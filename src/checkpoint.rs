//! Checkpoint Store
//!
//! Durable record of a resumable run: the selector cursor, the ledger of
//! processed ids and the committed output offset. Storage sits behind
//! [`CheckpointStore`] so the backend (flat JSON file or sled) can change
//! without touching the executor.

use crate::bulk::operation::OperationDescriptor;
use crate::error::{BulkError, StorageError};
use crate::types::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub mod file;
pub mod sled_store;

pub use file::FileCheckpointStore;
pub use sled_store::SledCheckpointStore;

/// Current on-disk format version.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Persisted progress of a resumable run. Field names are part of the stable
/// file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub format_version: u32,
    pub query_signature: String,
    pub cursor: Option<String>,
    pub processed_ids: BTreeSet<String>,
    pub output_offset: u64,
    /// Canonical export destination the offset refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub commits: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(query_signature: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            query_signature: query_signature.into(),
            cursor: None,
            processed_ids: BTreeSet::new(),
            output_offset: 0,
            destination: None,
            commits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processed_ids.contains(id)
    }

    /// Fold a completed batch into the checkpoint.
    pub fn advance<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        cursor: Option<String>,
        output_offset: u64,
    ) {
        self.processed_ids.extend(ids.into_iter().map(str::to_string));
        self.cursor = cursor;
        self.output_offset = output_offset;
        self.commits += 1;
        self.updated_at = Utc::now();
    }
}

/// Signature binding a checkpoint to the query, scope and operation that
/// produced it.
pub fn query_signature(query: &Query, operation: &OperationDescriptor) -> String {
    let scope = query.scope();
    let mut hasher = blake3::Hasher::new();
    let fields = [
        query.cql().to_string(),
        scope.space.clone().unwrap_or_default(),
        scope
            .content_type
            .map(|k| k.as_str().to_string())
            .unwrap_or_default(),
        operation.signature_material(),
    ];
    for field in &fields {
        // Length prefix keeps ("ab","c") and ("a","bc") distinct.
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Default checkpoint location for a signature inside `dir`.
pub fn default_checkpoint_path(dir: &Path, signature: &str) -> PathBuf {
    dir.join(format!("{}.json", signature))
}

/// Narrow persistence interface for checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, path: &Path) -> Result<Option<Checkpoint>, StorageError>;

    /// Durably replace the checkpoint at `path`.
    fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Remove the checkpoint; removing a missing checkpoint is not an error.
    fn remove(&self, path: &Path) -> Result<(), StorageError>;
}

/// Load a checkpoint for `--resume`, rejecting foreign or unknown formats.
pub fn load_for_resume(
    store: &dyn CheckpointStore,
    path: &Path,
    signature: &str,
) -> Result<Option<Checkpoint>, BulkError> {
    let Some(checkpoint) = store.load(path)? else {
        return Ok(None);
    };
    if checkpoint.format_version > CHECKPOINT_FORMAT_VERSION {
        return Err(BulkError::Validation(format!(
            "checkpoint {:?} uses format version {} (newest supported is {})",
            path, checkpoint.format_version, CHECKPOINT_FORMAT_VERSION
        )));
    }
    if checkpoint.query_signature != signature {
        return Err(BulkError::SignatureMismatch {
            expected: signature.to_string(),
            found: checkpoint.query_signature,
        });
    }
    Ok(Some(checkpoint))
}
