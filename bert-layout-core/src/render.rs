//! Layout rendering collaborator.
//!
//! The harness hands finished layouts to a [`LayoutRenderer`]; drawing them
//! is the renderer's business. [`JsonLayoutRenderer`] stores each request as
//! a JSON document so an external plotting tool can pick it up.

use crate::config::Dataset;
use crate::error::LayoutError;
use crate::persistence::atomic_write_json;
use crate::types::LayoutSequence;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Whether a rendered layout was generated or taken from the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Inferred,
    Real,
}

/// One layout to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub data: LayoutSequence,
    pub dataset: Dataset,
    pub border_size: u32,
    pub thickness: u32,
    /// File-name label, e.g. `infer5_run1`.
    pub label: String,
    pub kind: SampleKind,
    pub idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_link: Option<String>,
}

pub trait LayoutRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Result<(), LayoutError>;
}

/// Writes `<out_dir>/<label>.json` per request.
#[derive(Debug, Clone)]
pub struct JsonLayoutRenderer {
    out_dir: PathBuf,
}

impl JsonLayoutRenderer {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    /// Renderer writing to `<workdir>/samples`.
    pub fn in_workdir(workdir: &Path) -> Self {
        Self::new(workdir.join("samples"))
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        let safe: String = label
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.out_dir.join(format!("{safe}.json"))
    }
}

impl LayoutRenderer for JsonLayoutRenderer {
    fn render(&self, request: &RenderRequest) -> Result<(), LayoutError> {
        let path = self.path_for(&request.label);
        atomic_write_json(&path, request)?;
        info!(kind = ?request.kind, idx = request.idx, path = %path.display(), "Rendered layout");
        Ok(())
    }
}
