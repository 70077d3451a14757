//! Work-unit reporting: task status and artifact declarations.

use crate::error::LayoutError;
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// File the local work unit persists to, relative to the workdir.
pub const WORK_UNIT_FILE: &str = "work_unit.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Directory,
    File,
    Url,
}

/// A declared artifact of the running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub name: String,
}

/// Platform handle for the running job.
pub trait WorkUnit: Send + Sync {
    fn set_task_status(&self, status: &str) -> Result<(), LayoutError>;

    fn create_artifact(&self, kind: ArtifactKind, path: &Path, name: &str)
    -> Result<(), LayoutError>;
}

/// Persisted state of a local work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnitRecord {
    pub id: String,
    pub status: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub updated_at: DateTime<Utc>,
}

/// Work unit that logs and keeps a JSON record in the workdir.
#[derive(Debug)]
pub struct LocalWorkUnit {
    path: PathBuf,
    record: Mutex<WorkUnitRecord>,
}

impl LocalWorkUnit {
    /// Open the record in `workdir`, continuing an existing one if present.
    pub fn open(workdir: &Path) -> Result<Self, LayoutError> {
        let path = workdir.join(WORK_UNIT_FILE);
        let record = match load_json::<WorkUnitRecord>(&path)? {
            Some(record) => record,
            None => WorkUnitRecord {
                id: uuid::Uuid::new_v4().to_string(),
                status: None,
                artifacts: Vec::new(),
                updated_at: Utc::now(),
            },
        };
        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    pub fn record(&self) -> WorkUnitRecord {
        self.lock().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut WorkUnitRecord)) -> Result<(), LayoutError> {
        let mut record = self.lock();
        apply(&mut record);
        record.updated_at = Utc::now();
        atomic_write_json(&self.path, &*record)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkUnitRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WorkUnit for LocalWorkUnit {
    fn set_task_status(&self, status: &str) -> Result<(), LayoutError> {
        info!(status, "Work unit status");
        self.update(|r| r.status = Some(status.to_string()))
    }

    fn create_artifact(
        &self,
        kind: ArtifactKind,
        path: &Path,
        name: &str,
    ) -> Result<(), LayoutError> {
        info!(?kind, path = %path.display(), name, "Work unit artifact");
        let artifact = Artifact {
            kind,
            path: path.to_path_buf(),
            name: name.to_string(),
        };
        self.update(|r| {
            r.artifacts.retain(|a| a.name != artifact.name);
            r.artifacts.push(artifact);
        })
    }
}
