//! Durable sled-backed checkpoint store, keyed by checkpoint path.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::StorageError;
use sled::{Db, Tree};
use std::path::Path;

const TREE_CHECKPOINTS: &str = "checkpoints";

#[derive(Clone)]
pub struct SledCheckpointStore {
    db: Db,
    checkpoints: Tree,
}

impl SledCheckpointStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let checkpoints = db.open_tree(TREE_CHECKPOINTS)?;
        Ok(Self { db, checkpoints })
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        Self::new(sled::open(path)?)
    }

    fn key(path: &Path) -> Vec<u8> {
        path.to_string_lossy().into_owned().into_bytes()
    }
}

impl CheckpointStore for SledCheckpointStore {
    fn load(&self, path: &Path) -> Result<Option<Checkpoint>, StorageError> {
        let Some(raw) = self.checkpoints.get(Self::key(path))? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Some(parsed))
    }

    fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let value = serde_json::to_vec(checkpoint).map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.checkpoints.insert(Self::key(path), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        self.checkpoints.remove(Self::key(path))?;
        self.db.flush()?;
        Ok(())
    }
}
