//! # BERT-Layout Core
//!
//! Run harness for layout-generation experiments.
//! Provides the hyperparameter configuration registry, the run dispatcher,
//! trainer selection, the training loop, and the numeric backend interface.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod persistence;
pub mod platform;
pub mod render;
pub mod trainers;
pub mod training;
pub mod types;

// Re-export commonly used types at the crate root.
pub use backend::{LayoutBackend, MockBackend, WorkerBackend};
pub use config::{ConfigSource, ExperimentConfig, load_config, parse_override};
pub use dispatch::{
    IndexSource, PromptedLines, RemoteBackend, RunDispatcher, RunMode, RunOutcome, RunRequest,
};
pub use error::{ConfigError, DispatchError, LayoutError, Result, TrainerError};
pub use platform::{LocalWorkUnit, WorkUnit};
pub use render::{JsonLayoutRenderer, LayoutRenderer};
pub use trainers::{Trainer, TrainerRegistry};
pub use types::{LayoutSequence, SampleOutput, SampleRequest, Topology};
