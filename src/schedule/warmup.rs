use super::{one_cycle::annealing_cos, LrScheduler};
use crate::optimization::Optimizer;

/// Cosine warmup from `eta_min` up to each group's initial rate over
/// `t_max` optimizer steps.
#[derive(Debug, Clone)]
pub struct CosineWarmup {
    t_max: u64,
    eta_min: f64,
    step: u64,
}

impl CosineWarmup {
    pub fn new(t_max: u64, eta_min: f64) -> Self {
        Self {
            t_max,
            eta_min,
            step: 0,
        }
    }

    pub fn t_max(&self) -> u64 {
        self.t_max
    }

    /// The rate at `step` for a group whose target rate is `base_lr`.
    pub fn lr_at(&self, base_lr: f64, step: u64) -> f64 {
        if self.t_max == 0 {
            return base_lr;
        }

        let pct = step.min(self.t_max) as f64 / self.t_max as f64;
        annealing_cos(self.eta_min, base_lr, pct)
    }

    fn apply(&self, optimizer: &mut dyn Optimizer) {
        for group in optimizer.param_groups_mut() {
            group.lr = self.lr_at(group.initial_lr as f64, self.step) as f32;
        }
    }
}

impl LrScheduler for CosineWarmup {
    fn name(&self) -> &'static str {
        "cosine_warmup"
    }

    fn init(&mut self, optimizer: &mut dyn Optimizer) {
        self.apply(optimizer);
    }

    fn step_batch(&mut self, optimizer: &mut dyn Optimizer, accumulated_iter: u64) {
        self.step = accumulated_iter;
        self.apply(optimizer);
    }

    fn step_epoch(&mut self, _optimizer: &mut dyn Optimizer) {}
}
