//! Numeric backend interface.
//!
//! The backend owns model parameters, the data pipeline, and device
//! placement. Trainers only drive it: they decide *when* to step,
//! evaluate, checkpoint, and sample, and with which schedule values.

pub mod mock;
pub mod worker;

use crate::config::ExperimentConfig;
use crate::error::TrainerError;
use crate::types::{
    EvalMetrics, EvalRequest, Objective, SampleOutput, SampleRequest, StepMetrics,
    TrainStepRequest, Topology,
};
use async_trait::async_trait;
use std::path::Path;

pub use mock::{BackendCall, MockBackend};
pub use worker::WorkerBackend;

/// Operations a numeric backend provides to trainers and the dispatcher.
#[async_trait]
pub trait LayoutBackend: Send + Sync {
    /// Hide accelerators from the input pipeline so it does not reserve
    /// device memory needed by the model.
    async fn restrict_input_pipeline_devices(&self) -> Result<(), TrainerError>;

    /// Process index/count and visible devices.
    async fn topology(&self) -> Result<Topology, TrainerError>;

    /// Build the model and optimizer state for `config`.
    async fn initialize(
        &self,
        config: &ExperimentConfig,
        objective: Objective,
    ) -> Result<(), TrainerError>;

    async fn train_step(&self, request: TrainStepRequest) -> Result<StepMetrics, TrainerError>;

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalMetrics, TrainerError>;

    /// Persist parameters and optimizer state to `path`.
    async fn save_checkpoint(&self, path: &Path, step: u64) -> Result<(), TrainerError>;

    /// Load state from `path`, returning the step it was saved at.
    async fn restore_checkpoint(&self, path: &Path) -> Result<u64, TrainerError>;

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError>;
}
