//! Autoregressive transformer baseline.

use super::{Trainer, TrainerContext};
use crate::error::TrainerError;
use crate::training::{TrainingLoop, TrainingMetrics, TrainingPlan};
use crate::types::{Objective, SampleOutput, SampleRequest};
use async_trait::async_trait;
use tracing::{debug, info};

/// Left-to-right layout transformer.
///
/// Decoding is a single pass, so a multi-round refinement schedule is
/// collapsed to one round with the same total step budget.
pub struct TransformerTrainer {
    ctx: TrainerContext,
}

impl TransformerTrainer {
    pub const MODEL_CLASS: &'static str = "transformer";

    pub fn new(ctx: TrainerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Trainer for TransformerTrainer {
    fn name(&self) -> &str {
        "TransformerTrainer"
    }

    async fn train(&self) -> Result<TrainingMetrics, TrainerError> {
        info!(
            workdir = %self.ctx.workdir.display(),
            num_train_steps = self.ctx.config.num_train_steps,
            "Starting transformer training"
        );
        TrainingLoop::new(
            self.ctx.config.clone(),
            &self.ctx.workdir,
            self.ctx.backend.clone(),
            TrainingPlan {
                objective: Objective::Autoregressive,
                anneal_kl: false,
            },
        )
        .run()
        .await
    }

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError> {
        let total = request
            .total_steps()
            .ok_or_else(|| TrainerError::ScheduleOverflow {
                iterative_nums: request.iterative_nums.clone(),
            })?;
        if request.iterative_nums.len() > 1 {
            debug!(
                rounds = request.iterative_nums.len(),
                total, "Collapsing refinement schedule to a single pass"
            );
        }
        let single_pass = SampleRequest {
            iterative_nums: vec![total],
            ..request.clone()
        };
        self.ctx.backend.sample(&single_pass).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MockBackend};
    use crate::config::{Conditioning, ExperimentConfig, families};
    use std::sync::Arc;

    fn trainer(backend: Arc<MockBackend>, dir: &std::path::Path) -> TransformerTrainer {
        TransformerTrainer::new(TrainerContext {
            config: Arc::new(ExperimentConfig {
                num_train_steps: 4,
                ..families::transformer_categorized()
            }),
            workdir: dir.to_path_buf(),
            backend,
        })
    }

    #[tokio::test]
    async fn test_train_is_autoregressive_without_kl() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        trainer(backend.clone(), dir.path()).train().await.unwrap();
        let calls = backend.calls();
        assert_eq!(calls[0], BackendCall::Initialize(Objective::Autoregressive));
        assert!(calls.iter().all(|c| match c {
            BackendCall::TrainStep(r) => r.kl_weight == 0.0,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn test_sample_collapses_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let output = trainer(backend.clone(), dir.path())
            .sample(&SampleRequest {
                conditional: Conditioning::None,
                iterative_nums: vec![22, 22, 22],
                idx: 9,
            })
            .await
            .unwrap();
        assert_eq!(output.generated[0].len(), 1);
        assert_eq!(
            backend.calls(),
            vec![BackendCall::Sample(SampleRequest {
                conditional: Conditioning::None,
                iterative_nums: vec![66],
                idx: 9,
            })]
        );
    }

    #[tokio::test]
    async fn test_sample_rejects_overflowing_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let err = trainer(backend.clone(), dir.path())
            .sample(&SampleRequest {
                conditional: Conditioning::None,
                iterative_nums: vec![u32::MAX, 1],
                idx: 3,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::ScheduleOverflow { .. }));
        assert!(backend.calls().is_empty());
    }
}
