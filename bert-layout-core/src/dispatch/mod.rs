//! Run dispatcher.
//!
//! One dispatcher drives one run through a fixed sequence of states:
//!
//! ```text
//! Unstarted -> TrainerSelected -> Training -> Terminated
//!                              \-> Sampling -> Terminated
//! ```
//!
//! The mode is parsed before anything observable happens, so an unsupported
//! mode leaves the backend and work unit untouched. Environment preparation
//! happens exactly once, before trainer selection.

pub mod sampling;

use crate::backend::LayoutBackend;
use crate::config::ExperimentConfig;
use crate::error::{DispatchError, LayoutError};
use crate::platform::{ArtifactKind, WorkUnit};
use crate::render::LayoutRenderer;
use crate::trainers::{Trainer, TrainerContext, TrainerRegistry};
use crate::training::TrainingMetrics;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub use sampling::{
    IndexSource, PROMPT, PromptOutcome, PromptedLines, SamplingSession, SamplingSummary,
    parse_index,
};

/// Run mode requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Test,
}

impl RunMode {
    pub fn parse(mode: &str) -> Result<Self, DispatchError> {
        match mode {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(DispatchError::UnsupportedMode {
                mode: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of a single run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config: Arc<ExperimentConfig>,
    pub workdir: PathBuf,
    /// Raw mode string; validated when the run starts.
    pub mode: String,
}

impl RunRequest {
    pub fn new(config: ExperimentConfig, workdir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            workdir: workdir.into(),
            mode: mode.into(),
        }
    }

    /// Final path component of the workdir, used in rendered sample labels.
    pub fn workdir_label(&self) -> String {
        self.workdir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.workdir.display().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Unstarted,
    TrainerSelected,
    Training,
    Sampling,
    Terminated,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::TrainerSelected => "trainer_selected",
            Self::Training => "training",
            Self::Sampling => "sampling",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Trained(TrainingMetrics),
    Sampled(SamplingSummary),
}

/// Remote accelerator settings, reported during environment preparation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteBackend {
    pub target: Option<String>,
    pub platform: Option<String>,
}

impl RemoteBackend {
    /// Log lines for the settings that are present.
    pub fn report(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(target) = &self.target {
            lines.push(format!("Backend target: {target}"));
        }
        if let Some(platform) = &self.platform {
            lines.push(format!("Backend platform: {platform}"));
        }
        lines
    }
}

/// Drives one run from trainer selection to termination.
pub struct RunDispatcher {
    registry: TrainerRegistry,
    backend: Arc<dyn LayoutBackend>,
    work_unit: Arc<dyn WorkUnit>,
    renderer: Arc<dyn LayoutRenderer>,
    remote: RemoteBackend,
    state: DispatchState,
}

impl RunDispatcher {
    pub fn new(
        registry: TrainerRegistry,
        backend: Arc<dyn LayoutBackend>,
        work_unit: Arc<dyn WorkUnit>,
        renderer: Arc<dyn LayoutRenderer>,
    ) -> Self {
        Self {
            registry,
            backend,
            work_unit,
            renderer,
            remote: RemoteBackend::default(),
            state: DispatchState::Unstarted,
        }
    }

    pub fn with_remote(mut self, remote: RemoteBackend) -> Self {
        self.remote = remote;
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Build the trainer for the request's `model_class` without running it.
    pub fn select_trainer(&self, request: &RunRequest) -> Result<Box<dyn Trainer>, LayoutError> {
        self.registry.select(TrainerContext {
            config: request.config.clone(),
            workdir: request.workdir.clone(),
            backend: self.backend.clone(),
        })
    }

    /// Execute the run. `input` feeds the sampling loop in test mode and is
    /// not read during training.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        input: &mut dyn IndexSource,
    ) -> Result<RunOutcome, LayoutError> {
        if self.state != DispatchState::Unstarted {
            return Err(DispatchError::AlreadyStarted {
                state: self.state.to_string(),
            }
            .into());
        }
        let mode = RunMode::parse(&request.mode)?;
        // Fields are public, so a hand-built config may never have been checked.
        request.config.validate()?;

        // Any failure past this point ends the run.
        self.state = DispatchState::Terminated;
        self.prepare_environment(request).await?;

        let trainer = self.select_trainer(request)?;
        self.state = DispatchState::TrainerSelected;
        info!(
            trainer = trainer.name(),
            model_class = %request.config.model_class,
            %mode,
            "Selected trainer"
        );

        let outcome = match mode {
            RunMode::Train => {
                self.state = DispatchState::Training;
                let metrics = trainer.train().await;
                self.state = DispatchState::Terminated;
                RunOutcome::Trained(metrics?)
            }
            RunMode::Test => {
                self.state = DispatchState::Sampling;
                let session = SamplingSession::new(
                    trainer.as_ref(),
                    self.renderer.as_ref(),
                    &request.config,
                    request.workdir_label(),
                );
                let summary = session.run(input).await;
                self.state = DispatchState::Terminated;
                RunOutcome::Sampled(summary?)
            }
        };
        info!(%mode, "Run finished");
        Ok(outcome)
    }

    async fn prepare_environment(&self, request: &RunRequest) -> Result<(), LayoutError> {
        // Keep the input pipeline off the accelerators.
        self.backend.restrict_input_pipeline_devices().await?;

        let topology = self.backend.topology().await?;
        info!(
            "Process: {} / {}",
            topology.process_index, topology.process_count
        );
        info!(devices = ?topology.devices, "Local devices");
        if topology.process_index >= topology.process_count {
            warn!(
                process_index = topology.process_index,
                process_count = topology.process_count,
                "Process index outside reported process count"
            );
        }

        for line in self.remote.report() {
            info!("{line}");
        }

        self.work_unit.set_task_status(&format!(
            "process_index: {}, process_count: {}",
            topology.process_index, topology.process_count
        ))?;
        self.work_unit
            .create_artifact(ArtifactKind::Directory, &request.workdir, "workdir")?;
        Ok(())
    }
}
