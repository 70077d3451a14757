//! Masked-token layout trainer with optional VAE objective.

use super::{Trainer, TrainerContext};
use crate::error::TrainerError;
use crate::training::{TrainingLoop, TrainingMetrics, TrainingPlan};
use crate::types::{Objective, SampleOutput, SampleRequest};
use async_trait::async_trait;
use tracing::info;

/// Non-autoregressive BERT-style layout trainer.
///
/// Sampling refines a fully masked layout over the rounds of the iterative
/// schedule; the KL weight is annealed with `beta_rate` when `use_vae` is on.
pub struct BertLayoutTrainer {
    ctx: TrainerContext,
}

impl BertLayoutTrainer {
    pub const MODEL_CLASS: &'static str = "bert_layout";

    pub fn new(ctx: TrainerContext) -> Self {
        Self { ctx }
    }

    fn plan(&self) -> TrainingPlan {
        TrainingPlan {
            objective: Objective::Masked,
            anneal_kl: self.ctx.config.use_vae,
        }
    }
}

#[async_trait]
impl Trainer for BertLayoutTrainer {
    fn name(&self) -> &str {
        "BertLayoutTrainer"
    }

    async fn train(&self) -> Result<TrainingMetrics, TrainerError> {
        info!(
            workdir = %self.ctx.workdir.display(),
            use_vae = self.ctx.config.use_vae,
            num_train_steps = self.ctx.config.num_train_steps,
            "Starting BERT-layout training"
        );
        TrainingLoop::new(
            self.ctx.config.clone(),
            &self.ctx.workdir,
            self.ctx.backend.clone(),
            self.plan(),
        )
        .run()
        .await
    }

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError> {
        self.ctx.backend.sample(request).await
    }
}
