//! Trainers and the registration table that selects them.
//!
//! A trainer is chosen by the config's `model_class`. The table is flat:
//! adding a trainer means registering one more factory, never touching the
//! dispatcher or existing trainers.

pub mod bert_layout;
pub mod transformer;

use crate::backend::LayoutBackend;
use crate::config::ExperimentConfig;
use crate::error::{DispatchError, LayoutError, TrainerError};
use crate::training::TrainingMetrics;
use crate::types::{SampleOutput, SampleRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub use bert_layout::BertLayoutTrainer;
pub use transformer::TransformerTrainer;

/// Capability every trainer provides to the dispatcher.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Stable name of the implementation, e.g. `BertLayoutTrainer`.
    fn name(&self) -> &str;

    /// Run training to completion.
    async fn train(&self) -> Result<TrainingMetrics, TrainerError>;

    /// Conditionally sample against one dataset example.
    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError>;
}

/// Everything a trainer factory needs.
#[derive(Clone)]
pub struct TrainerContext {
    pub config: Arc<ExperimentConfig>,
    pub workdir: PathBuf,
    pub backend: Arc<dyn LayoutBackend>,
}

/// Builds a trainer bound to a context.
pub type TrainerFactory =
    Box<dyn Fn(TrainerContext) -> Result<Box<dyn Trainer>, LayoutError> + Send + Sync>;

/// Map from `model_class` to trainer factory.
pub struct TrainerRegistry {
    factories: HashMap<String, TrainerFactory>,
}

impl TrainerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `transformer` and `bert_layout` trainers.
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<String, TrainerFactory> = HashMap::new();
        factories.insert(
            TransformerTrainer::MODEL_CLASS.to_string(),
            Box::new(build_transformer),
        );
        factories.insert(
            BertLayoutTrainer::MODEL_CLASS.to_string(),
            Box::new(build_bert_layout),
        );
        Self { factories }
    }

    /// Register a factory. Fails if `model_class` is already taken.
    pub fn register<F>(&mut self, model_class: &str, factory: F) -> Result<(), DispatchError>
    where
        F: Fn(TrainerContext) -> Result<Box<dyn Trainer>, LayoutError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(model_class) {
            return Err(DispatchError::DuplicateTrainer {
                model_class: model_class.to_string(),
            });
        }
        debug!(model_class, "Registering trainer");
        self.factories
            .insert(model_class.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, model_class: &str) -> bool {
        self.factories.contains_key(model_class)
    }

    /// Registered model classes, sorted.
    pub fn model_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the trainer for `ctx.config.model_class`.
    ///
    /// Unknown classes fail with [`DispatchError::UnsupportedModel`]; there
    /// is no fallback trainer.
    pub fn select(&self, ctx: TrainerContext) -> Result<Box<dyn Trainer>, LayoutError> {
        let model_class = ctx.config.model_class.clone();
        let factory =
            self.factories
                .get(&model_class)
                .ok_or_else(|| DispatchError::UnsupportedModel {
                    model_class: model_class.clone(),
                })?;
        factory(ctx)
    }
}

fn build_transformer(ctx: TrainerContext) -> Result<Box<dyn Trainer>, LayoutError> {
    Ok(Box::new(TransformerTrainer::new(ctx)))
}

fn build_bert_layout(ctx: TrainerContext) -> Result<Box<dyn Trainer>, LayoutError> {
    Ok(Box::new(BertLayoutTrainer::new(ctx)))
}

impl Default for TrainerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
