//! Learning-rate and KL-weight schedules.

use crate::config::OptimizerConfig;

/// Linear warmup followed by inverse square-root decay.
///
/// `lr(s) = base * min(1, t / warmup) * sqrt(warmup / max(t, warmup))` with
/// `t = s + 1`, so the rate peaks at `base` once warmup completes. A zero
/// warmup skips the ramp and decays from `base` as `1 / sqrt(t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateSchedule {
    base: f64,
    warmup_steps: u64,
}

impl LearningRateSchedule {
    pub fn new(base: f64, warmup_steps: u64) -> Self {
        Self { base, warmup_steps }
    }

    pub fn from_optimizer(optimizer: &OptimizerConfig) -> Self {
        Self::new(optimizer.lr, optimizer.warmup_steps)
    }

    pub fn at(&self, step: u64) -> f64 {
        let t = (step + 1) as f64;
        let warmup = self.warmup_steps.max(1) as f64;
        let ramp = (t / warmup).min(1.0);
        let decay = (warmup / t.max(warmup)).sqrt();
        self.base * ramp * decay
    }
}

/// KL-weight annealing: `min(1, step * rate)`.
pub fn kl_weight(step: u64, beta_rate: f64) -> f64 {
    (step as f64 * beta_rate).min(1.0)
}
