//! Checkpoint manifest for training runs.
//!
//! The backend writes the checkpoint payload; this manager decides where it
//! goes, records it in `<dir>/checkpoints.json`, and prunes old entries.

use crate::error::TrainerError;
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST: &str = "checkpoints.json";

/// A recorded checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub step: u64,
    pub path: PathBuf,
    /// SHA-256 over the payload file, or over the step when the backend
    /// wrote a directory.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint manager rooted at one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    base_dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: PathBuf, max_checkpoints: usize) -> Self {
        Self {
            base_dir,
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Where the payload for `step` should be written.
    pub fn path_for(&self, step: u64) -> PathBuf {
        self.base_dir.join(format!("checkpoint_{step}"))
    }

    /// Manifest entries, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>, TrainerError> {
        Ok(load_json(&self.base_dir.join(MANIFEST))?.unwrap_or_default())
    }

    /// The checkpoint with the highest step.
    pub fn latest(&self) -> Result<Option<Checkpoint>, TrainerError> {
        Ok(self.list()?.into_iter().max_by_key(|c| c.step))
    }

    /// Record a payload the backend has written to `path_for(step)`.
    ///
    /// Entries for the same step are replaced; the oldest entries beyond
    /// `max_checkpoints` are dropped from the manifest and their payload
    /// files removed.
    pub fn record(&self, step: u64) -> Result<Checkpoint, TrainerError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.path_for(step);

        let mut hasher = Sha256::new();
        let size_bytes = if path.is_file() {
            let bytes = std::fs::read(&path)?;
            hasher.update(&bytes);
            bytes.len() as u64
        } else {
            hasher.update(step.to_le_bytes());
            0
        };

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            step,
            path,
            hash: format!("{:x}", hasher.finalize()),
            size_bytes,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        checkpoints.retain(|c| c.step != step);
        checkpoints.push(checkpoint.clone());
        checkpoints.sort_by_key(|c| c.step);

        while checkpoints.len() > self.max_checkpoints {
            let old = checkpoints.remove(0);
            debug!(step = old.step, path = %old.path.display(), "Pruning checkpoint");
            remove_payload(&old.path)?;
        }

        atomic_write_json(&self.base_dir.join(MANIFEST), &checkpoints)?;
        Ok(checkpoint)
    }
}

fn remove_payload(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        Ok(())
    }
}
