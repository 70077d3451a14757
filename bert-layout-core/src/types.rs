//! Value types shared by trainers, the backend, the dispatcher, and renderers.

use crate::config::Conditioning;
use serde::{Deserialize, Serialize};

/// Token sequence describing one layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayoutSequence(pub Vec<i64>);

impl LayoutSequence {
    pub fn tokens(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<i64>> for LayoutSequence {
    fn from(tokens: Vec<i64>) -> Self {
        Self(tokens)
    }
}

/// Conditional sampling against one dataset example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRequest {
    pub conditional: Conditioning,
    pub iterative_nums: Vec<u32>,
    pub idx: u64,
}

impl SampleRequest {
    /// Total decoding steps across every refinement round, `None` on overflow.
    pub fn total_steps(&self) -> Option<u32> {
        total_steps(&self.iterative_nums)
    }
}

/// Checked sum of a refinement schedule.
pub fn total_steps(iterative_nums: &[u32]) -> Option<u32> {
    iterative_nums.iter().try_fold(0u32, |acc, &n| acc.checked_add(n))
}

/// Result of a conditional sampling call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleOutput {
    /// `generated[sample][refinement_step]`.
    pub generated: Vec<Vec<LayoutSequence>>,
    /// Reference layouts, one per sample.
    pub real: Vec<LayoutSequence>,
    /// Background image of the reference example, if the dataset has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_link: Option<String>,
}

/// Process and device topology reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub process_index: u32,
    pub process_count: u32,
    pub devices: Vec<String>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            process_index: 0,
            process_count: 1,
            devices: Vec::new(),
        }
    }
}

/// Training objective the backend should optimize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Masked-token denoising (BERT-style), optionally with a KL term.
    Masked,
    /// Left-to-right next-token prediction.
    Autoregressive,
}

/// One optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainStepRequest {
    pub step: u64,
    pub learning_rate: f64,
    pub kl_weight: f64,
}

/// Losses reported for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub loss: f64,
    #[serde(default)]
    pub kl: Option<f64>,
}

/// Evaluation pass request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRequest {
    pub step: u64,
    pub num_steps: u64,
}

/// Evaluation pass result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
}
