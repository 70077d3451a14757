//! In-process deterministic backend for tests and dry runs.

use super::LayoutBackend;
use crate::config::ExperimentConfig;
use crate::error::TrainerError;
use crate::types::{
    EvalMetrics, EvalRequest, LayoutSequence, Objective, SampleOutput, SampleRequest,
    StepMetrics, TrainStepRequest, Topology,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A recorded backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    RestrictInputPipelineDevices,
    Topology,
    Initialize(Objective),
    TrainStep(TrainStepRequest),
    Evaluate(EvalRequest),
    SaveCheckpoint { path: PathBuf, step: u64 },
    RestoreCheckpoint(PathBuf),
    Sample(SampleRequest),
}

/// Backend that answers from simple formulas and records every call.
///
/// Training loss is `1 / (step + 1)`; checkpoints are small JSON files
/// holding the step, so a fresh mock can restore what another saved.
#[derive(Debug, Default)]
pub struct MockBackend {
    calls: Mutex<Vec<BackendCall>>,
    topology: Topology,
    non_finite_at: Option<u64>,
    fail_at: Option<u64>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Report a NaN loss at `step`.
    pub fn with_non_finite_loss_at(mut self, step: u64) -> Self {
        self.non_finite_at = Some(step);
        self
    }

    /// Fail the train step at `step` with a backend error.
    pub fn with_failure_at(mut self, step: u64) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().clone()
    }

    /// Number of train steps executed.
    pub fn train_steps(&self) -> Vec<u64> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                BackendCall::TrainStep(r) => Some(r.step),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BackendCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LayoutBackend for MockBackend {
    async fn restrict_input_pipeline_devices(&self) -> Result<(), TrainerError> {
        self.record(BackendCall::RestrictInputPipelineDevices);
        Ok(())
    }

    async fn topology(&self) -> Result<Topology, TrainerError> {
        self.record(BackendCall::Topology);
        Ok(self.topology.clone())
    }

    async fn initialize(
        &self,
        _config: &ExperimentConfig,
        objective: Objective,
    ) -> Result<(), TrainerError> {
        self.record(BackendCall::Initialize(objective));
        Ok(())
    }

    async fn train_step(&self, request: TrainStepRequest) -> Result<StepMetrics, TrainerError> {
        self.record(BackendCall::TrainStep(request));
        if self.fail_at == Some(request.step) {
            return Err(TrainerError::backend(format!(
                "injected failure at step {}",
                request.step
            )));
        }
        let loss = if self.non_finite_at == Some(request.step) {
            f64::NAN
        } else {
            1.0 / (request.step as f64 + 1.0)
        };
        Ok(StepMetrics {
            loss,
            kl: (request.kl_weight > 0.0).then_some(0.1),
        })
    }

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalMetrics, TrainerError> {
        self.record(BackendCall::Evaluate(request));
        Ok(EvalMetrics {
            loss: 2.0 / (request.step as f64 + 1.0),
        })
    }

    async fn save_checkpoint(&self, path: &Path, step: u64) -> Result<(), TrainerError> {
        self.record(BackendCall::SaveCheckpoint {
            path: path.to_path_buf(),
            step,
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(&serde_json::json!({ "step": step }))?)?;
        Ok(())
    }

    async fn restore_checkpoint(&self, path: &Path) -> Result<u64, TrainerError> {
        self.record(BackendCall::RestoreCheckpoint(path.to_path_buf()));
        let content = std::fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&content)?;
        value["step"]
            .as_u64()
            .ok_or_else(|| TrainerError::checkpoint(format!("{} has no step", path.display())))
    }

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError> {
        self.record(BackendCall::Sample(request.clone()));
        let idx = request.idx as i64;
        // One sample, one sequence per refinement round, the last round
        // tagged with the total step count.
        let mut steps: Vec<LayoutSequence> = request
            .iterative_nums
            .iter()
            .map(|&n| LayoutSequence(vec![idx, i64::from(n)]))
            .collect();
        let total: u64 = request.iterative_nums.iter().map(|&n| u64::from(n)).sum();
        if let Some(last) = steps.last_mut() {
            last.0.push(total as i64);
        }
        Ok(SampleOutput {
            generated: vec![steps],
            real: vec![LayoutSequence(vec![idx])],
            image_link: Some(format!("images/{idx}.png")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Conditioning;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let backend = MockBackend::new();
        backend.restrict_input_pipeline_devices().await.unwrap();
        backend.topology().await.unwrap();
        assert_eq!(
            backend.calls(),
            vec![BackendCall::RestrictInputPipelineDevices, BackendCall::Topology]
        );
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt").join("step_10");
        MockBackend::new().save_checkpoint(&path, 10).await.unwrap();
        let step = MockBackend::new().restore_checkpoint(&path).await.unwrap();
        assert_eq!(step, 10);
    }

    #[tokio::test]
    async fn test_sample_shape_follows_schedule() {
        let output = MockBackend::new()
            .sample(&SampleRequest {
                conditional: Conditioning::AttributeSize,
                iterative_nums: vec![22, 22, 22],
                idx: 5,
            })
            .await
            .unwrap();
        assert_eq!(output.generated.len(), 1);
        assert_eq!(output.generated[0].len(), 3);
        assert_eq!(output.generated[0][2].tokens(), &[5, 22, 66]);
        assert_eq!(output.real[0].tokens(), &[5]);
    }
}
