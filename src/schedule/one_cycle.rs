use std::f64::consts::PI;

use super::LrScheduler;
use crate::optimization::Optimizer;

/// Cosine interpolation from `start` (at `pct = 0`) to `end` (at `pct = 1`).
pub fn annealing_cos(start: f64, end: f64, pct: f64) -> f64 {
    let cos_out = (PI * pct).cos() + 1.;
    end + (start - end) / 2. * cos_out
}

/// One-cycle policy over the whole run.
///
/// The rate rises from `lr_max / div_factor` to `lr_max` during the first
/// `pct_start` of the steps and falls back afterwards, reaching the low rate
/// again on the last step. Momentum moves the opposite way between the two
/// configured values. Everything is a pure function of the step index.
///
/// The peak sits at `floor(pct_start * total_steps)`, kept within
/// `1..=total_steps - 2` so that the first and last steps both run at the
/// low rate. Runs shorter than three steps have no room for a peak and stay
/// at the low rate throughout.
#[derive(Debug, Clone)]
pub struct OneCycle {
    total_steps: u64,
    peak_step: u64,
    lr_max: f64,
    low_lr: f64,
    moms: (f64, f64),
    step: u64,
}

impl OneCycle {
    pub fn new(
        total_steps: u64,
        lr_max: f64,
        moms: (f64, f64),
        div_factor: f64,
        pct_start: f64,
    ) -> Self {
        let peak_step = match total_steps {
            0..=2 => 0,
            _ => ((pct_start * total_steps as f64) as u64).clamp(1, total_steps - 2),
        };

        Self {
            total_steps,
            peak_step,
            lr_max,
            low_lr: lr_max / div_factor,
            moms,
            step: 0,
        }
    }

    /// Positions the schedule at an already completed step count.
    pub fn resume_at(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// The step at which the rate peaks.
    pub fn peak_step(&self) -> u64 {
        self.peak_step
    }

    /// Learning rate and momentum at `step`.
    pub fn values_at(&self, step: u64) -> (f64, f64) {
        let (m_low, m_high) = self.moms;

        if self.total_steps < 3 {
            return (self.low_lr, m_low);
        }

        if step < self.peak_step {
            let pct = step as f64 / self.peak_step as f64;
            return (
                annealing_cos(self.low_lr, self.lr_max, pct),
                annealing_cos(m_low, m_high, pct),
            );
        }

        let last = self.total_steps.saturating_sub(1);
        let span = last.saturating_sub(self.peak_step).max(1);
        let pct = ((step - self.peak_step) as f64 / span as f64).min(1.);
        (
            annealing_cos(self.lr_max, self.low_lr, pct),
            annealing_cos(m_high, m_low, pct),
        )
    }

    pub fn lr_at(&self, step: u64) -> f64 {
        self.values_at(step).0
    }

    pub fn momentum_at(&self, step: u64) -> f64 {
        self.values_at(step).1
    }

    fn apply(&self, optimizer: &mut dyn Optimizer) {
        let (lr, mom) = self.values_at(self.step);
        for group in optimizer.param_groups_mut() {
            group.lr = lr as f32;
            group.set_momentum_term(mom as f32);
        }
    }
}

impl LrScheduler for OneCycle {
    fn name(&self) -> &'static str {
        "one_cycle"
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
