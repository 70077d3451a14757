//! Step-level training loop shared by every trainer.
//!
//! The loop owns the cadence (logging, evaluation, checkpointing) and the
//! schedules; the backend performs the numeric work of each step.

use super::checkpoint::CheckpointManager;
use super::metrics::{LossWindow, TrainingMetrics};
use super::schedule::{LearningRateSchedule, kl_weight};
use crate::backend::LayoutBackend;
use crate::config::ExperimentConfig;
use crate::error::TrainerError;
use crate::persistence::atomic_write_json;
use crate::types::{EvalRequest, Objective, TrainStepRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// File the final metrics are written to, relative to the workdir.
pub const METRICS_FILE: &str = "metrics.json";

/// How a trainer wants the shared loop to behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPlan {
    pub objective: Objective,
    /// Anneal the KL weight with `beta_rate`; otherwise it stays 0.
    pub anneal_kl: bool,
}

/// Drives one training run against a backend.
pub struct TrainingLoop {
    config: Arc<ExperimentConfig>,
    workdir: PathBuf,
    backend: Arc<dyn LayoutBackend>,
    plan: TrainingPlan,
}

impl TrainingLoop {
    pub fn new(
        config: Arc<ExperimentConfig>,
        workdir: &Path,
        backend: Arc<dyn LayoutBackend>,
        plan: TrainingPlan,
    ) -> Self {
        Self {
            config,
            workdir: workdir.to_path_buf(),
            backend,
            plan,
        }
    }

    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(self.workdir.join("checkpoints"), self.config.max_checkpoints)
    }

    /// Run from the latest checkpoint (when restoring is enabled) to
    /// `num_train_steps`, then write the metrics file.
    pub async fn run(&self) -> Result<TrainingMetrics, TrainerError> {
        let config = &self.config;
        self.backend
            .initialize(config, self.plan.objective)
            .await?;

        let checkpoints = self.checkpoints();
        let start = self.restore(&checkpoints).await?;
        if start >= config.num_train_steps {
            warn!(
                start,
                num_train_steps = config.num_train_steps,
                "Checkpoint already covers every train step"
            );
        }

        let schedule = LearningRateSchedule::from_optimizer(&config.optimizer);
        let mut metrics = TrainingMetrics::starting_at(start);
        let mut window = LossWindow::default();
        let started = Instant::now();

        for step in start..config.num_train_steps {
            let learning_rate = schedule.at(step);
            let kl = if self.plan.anneal_kl {
                kl_weight(step, config.beta_rate)
            } else {
                0.0
            };

            let output = self
                .backend
                .train_step(TrainStepRequest {
                    step,
                    learning_rate,
                    kl_weight: kl,
                })
                .await?;
            if !output.loss.is_finite() {
                return Err(TrainerError::NonFiniteLoss { step });
            }
            window.push(output.loss);
            metrics.steps_completed += 1;

            let done = step + 1;
            let last = done == config.num_train_steps;

            if done % config.log_every_steps == 0 || last {
                if let Some(loss) = window.take_mean() {
                    metrics.record_train(done, loss);
                    info!(step = done, loss, learning_rate, kl_weight = kl, "Train");
                }
            }

            if config.num_eval_steps > 0 && (done % config.eval_every_steps == 0 || last) {
                let eval = self
                    .backend
                    .evaluate(EvalRequest {
                        step: done,
                        num_steps: config.num_eval_steps,
                    })
                    .await?;
                metrics.record_eval(done, eval.loss);
                info!(step = done, eval_loss = eval.loss, "Eval");
            }

            if done % config.checkpoint_every_steps == 0 || last {
                let path = checkpoints.path_for(done);
                self.backend.save_checkpoint(&path, done).await?;
                let checkpoint = checkpoints.record(done)?;
                info!(step = done, path = %checkpoint.path.display(), "Saved checkpoint");
            }
        }

        metrics.total_training_time_secs = started.elapsed().as_secs_f64();
        atomic_write_json(&self.workdir.join(METRICS_FILE), &metrics)?;
        Ok(metrics)
    }

    async fn restore(&self, checkpoints: &CheckpointManager) -> Result<u64, TrainerError> {
        if !self.config.restore_checkpoints {
            return Ok(0);
        }
        let Some(latest) = checkpoints.latest()? else {
            info!("No checkpoint to restore, starting from step 0");
            return Ok(0);
        };
        let step = self.backend.restore_checkpoint(&latest.path).await?;
        info!(step, path = %latest.path.display(), "Restored checkpoint");
        Ok(step)
    }
}
