//! Training infrastructure: schedules, metrics, checkpoints, and the loop.

pub mod checkpoint;
pub mod metrics;
pub mod runner;
pub mod schedule;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use metrics::{LossPoint, TrainingMetrics};
pub use runner::{METRICS_FILE, TrainingLoop, TrainingPlan};
pub use schedule::{LearningRateSchedule, kl_weight};
