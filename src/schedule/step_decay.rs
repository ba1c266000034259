use super::LrScheduler;
use crate::optimization::Optimizer;

/// Slack used when turning fractional decay points into epoch indices, so
/// that products like `0.7 * 10` land on epoch 7 rather than 8.
const BOUNDARY_EPS: f64 = 1e-9;

/// Piecewise-constant decay: the rate drops by `lr_decay` at each boundary
/// epoch and never falls below `floor` times the initial rate.
#[derive(Debug, Clone)]
pub struct StepDecay {
    boundaries: Vec<usize>,
    lr_decay: f64,
    floor: f64,
    epoch: usize,
}

impl StepDecay {
    /// # Arguments
    /// * `decay_step_list` - Fractions of `total_epochs` at which the rate decays.
    /// * `lr_decay` - Factor applied at each boundary.
    /// * `floor` - Smallest allowed multiplier (`LR_clip / LR`).
    /// * `last_epoch` - Epochs already completed when resuming.
    pub fn new(
        decay_step_list: &[f64],
        total_epochs: usize,
        lr_decay: f64,
        floor: f64,
        last_epoch: Option<usize>,
    ) -> Self {
        let boundaries = decay_step_list
            .iter()
            .map(|f| decay_boundary(*f, total_epochs))
            .collect();

        Self {
            boundaries,
            lr_decay,
            floor,
            epoch: last_epoch.unwrap_or(0),
        }
    }

    /// Epoch indices at which a decay kicks in.
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// The factor applied to the initial rate during `epoch`.
    pub fn multiplier(&self, epoch: usize) -> f64 {
        let passed = self.boundaries.iter().filter(|&&b| epoch >= b).count();
        let decay = (0..passed).fold(1., |acc, _| acc * self.lr_decay);
        decay.max(self.floor)
    }

    fn apply(&self, optimizer: &mut dyn Optimizer) {
        let m = self.multiplier(self.epoch);
        for group in optimizer.param_groups_mut() {
            group.lr = (group.initial_lr as f64 * m) as f32;
        }
    }
}

/// First epoch index `e` with `e >= fraction * total_epochs`.
pub fn decay_boundary(fraction: f64, total_epochs: usize) -> usize {
    let at = fraction * total_epochs as f64;
    (at - BOUNDARY_EPS).ceil().max(0.) as usize
}

impl LrScheduler for StepDecay {
    fn name(&self) -> &'static str {
        "step_decay"
    }

    fn init(&mut self, optimizer: &mut dyn Optimizer) {
        self.apply(optimizer);
    }

    fn step_batch(&mut self, optimizer: &mut dyn Optimizer, _accumulated_iter: u64) {
        self.apply(optimizer);
    }

    fn step_epoch(&mut self, optimizer: &mut dyn Optimizer) {
        self.epoch += 1;
        self.apply(optimizer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_round_fractional_products() {
        assert_eq!(decay_boundary(0.7, 10), 7);
        assert_eq!(decay_boundary(0.35, 80), 28);
        assert_eq!(decay_boundary(0.33, 10), 4);
        assert_eq!(decay_boundary(0., 10), 0);
    }

    #[test]
    fn multiplier_plateaus_then_floors() {
        let s = StepDecay::new(&[0.2, 0.4, 0.6, 0.8], 10, 0.1, 1e-3, None);

        assert_eq!(s.multiplier(0), 1.);
        assert_eq!(s.multiplier(1), 1.);
        assert!((s.multiplier(2) - 0.1).abs() < 1e-12);
        assert!((s.multiplier(4) - 0.01).abs() < 1e-12);
        // 1e-3 and 1e-4 are both clipped to the floor.
        assert_eq!(s.multiplier(6), 1e-3_f64.max(0.1 * 0.1 * 0.1));
        assert_eq!(s.multiplier(9), 1e-3);
    }

    #[test]
    fn multiplier_is_non_increasing_and_floored() {
        for total in [1, 7, 10, 33, 80] {
            let s = StepDecay::new(&[0.1, 0.35, 0.45, 0.9, 1.0], total, 0.3, 0.05, None);
            let mut prev = f64::INFINITY;
            for e in 0..=total + 2 {
                let m = s.multiplier(e);
                assert!(m <= prev, "total {total}, epoch {e}");
                assert!(m >= 0.05);
                prev = m;
            }
        }
    }
}
