//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Loss at one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossPoint {
    pub step: u64,
    pub loss: f64,
}

/// Metrics accumulated over one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Step the run started from (non-zero after a restore).
    pub start_step: u64,
    pub steps_completed: u64,
    /// Mean train loss over each logging window.
    pub loss_history: Vec<LossPoint>,
    pub eval_loss_history: Vec<LossPoint>,
    pub best_eval_step: Option<u64>,
    pub best_eval_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn starting_at(step: u64) -> Self {
        Self {
            start_step: step,
            ..Self::default()
        }
    }

    pub fn record_train(&mut self, step: u64, loss: f64) {
        self.loss_history.push(LossPoint { step, loss });
    }

    pub fn record_eval(&mut self, step: u64, loss: f64) {
        self.eval_loss_history.push(LossPoint { step, loss });
        if self.best_eval_loss.is_none_or(|best| loss < best) {
            self.best_eval_loss = Some(loss);
            self.best_eval_step = Some(step);
        }
    }
}

/// Running mean of train losses between log points.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LossWindow {
    sum: f64,
    count: u64,
}

impl LossWindow {
    pub(crate) fn push(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    /// Mean of the window, resetting it.
    pub(crate) fn take_mean(&mut self) -> Option<f64> {
        let mean = (self.count > 0).then(|| self.sum / self.count as f64);
        *self = Self::default();
        mean
    }
}
