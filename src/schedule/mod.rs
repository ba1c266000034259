//! Learning-rate schedules and the builder that composes them from config.

mod one_cycle;
mod step_decay;
mod warmup;

pub use one_cycle::{annealing_cos, OneCycle};
pub use step_decay::{decay_boundary, StepDecay};
pub use warmup::CosineWarmup;

use crate::{
    config::{OptimizerConfig, OptimizerKind},
    error::Result,
    optimization::Optimizer,
};

/// A schedule that rewrites the optimizer's parameter groups.
///
/// Schedules are driven at two cadences: `step_batch` before every optimizer
/// step and `step_epoch` once after each epoch. Each schedule reacts to the
/// cadence it is defined on.
pub trait LrScheduler {
    fn name(&self) -> &'static str;

    /// Writes the schedule's starting values into the optimizer.
    fn init(&mut self, optimizer: &mut dyn Optimizer);

    /// Called before the optimizer step that brings the global step count
    /// to `accumulated_iter + 1`.
    fn step_batch(&mut self, optimizer: &mut dyn Optimizer, accumulated_iter: u64);

    /// Called once after every epoch this schedule was active for.
    fn step_epoch(&mut self, optimizer: &mut dyn Optimizer);
}

/// The primary schedule plus the optional warmup that precedes it.
pub type Schedules = (Box<dyn LrScheduler>, Option<Box<dyn LrScheduler>>);

/// Composes the primary schedule and the optional warmup from `cfg`.
///
/// # Arguments
/// * `optimizer` - The optimizer the schedules will drive; its groups are set to the starting rate.
/// * `steps_per_epoch` - Optimizer steps in one epoch.
/// * `total_epochs` - Length of the whole run.
/// * `last_epoch` - Epochs already completed when resuming, `None` from scratch.
///
/// # Errors
/// `TrainErr::UnsupportedConfiguration` for an unknown optimizer name.
pub fn build_scheduler(
    optimizer: &mut dyn Optimizer,
    steps_per_epoch: usize,
    total_epochs: usize,
    last_epoch: Option<usize>,
    cfg: &OptimizerConfig,
) -> Result<Schedules> {
    let total_steps = (steps_per_epoch * total_epochs) as u64;
    let lr = cfg.learning_rate as f64;

    if cfg.kind()? == OptimizerKind::OneCycle {
        let done = (last_epoch.unwrap_or(0) * steps_per_epoch) as u64;
        let mut primary = OneCycle::new(total_steps, lr, cfg.moms, cfg.div_factor, cfg.pct_start)
            .resume_at(done);
        primary.init(optimizer);

        log::info!(total_steps = total_steps, resume_step = done; "using one-cycle schedule");
        return Ok((Box::new(primary), None));
    }

    let mut primary = StepDecay::new(
        &cfg.decay_step_list,
        total_epochs,
        cfg.lr_decay,
        cfg.lr_clip / lr,
        last_epoch,
    );
    primary.init(optimizer);
    log::info!(
        boundaries:? = primary.boundaries(),
        start_epoch = primary.epoch();
        "using step-decay schedule"
    );

    let warmup = cfg.warmup_enabled.then(|| {
        let t_max = (cfg.warmup_epochs * steps_per_epoch) as u64;
        Box::new(CosineWarmup::new(t_max, lr / cfg.div_factor)) as Box<dyn LrScheduler>
    });

    Ok((Box::new(primary), warmup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{optimization::build_optimizer, params::Parameter};

    fn optimizer_for(cfg: &OptimizerConfig) -> Box<dyn Optimizer> {
        build_optimizer(&[Parameter::zeros("w", &[2])], cfg).unwrap()
    }

    #[test]
    fn resumed_step_decay_matches_stepping_from_scratch() {
        let mut cfg = OptimizerConfig::new("sgd", 0.01);
        cfg.decay_step_list = vec![0.3, 0.6, 0.8];
        cfg.lr_decay = 0.5;
        cfg.lr_clip = 1e-5;

        for k in 0..=20 {
            let mut stepped = optimizer_for(&cfg);
            let (mut sched, _) = build_scheduler(stepped.as_mut(), 10, 20, None, &cfg).unwrap();
            for _ in 0..k {
                sched.step_epoch(stepped.as_mut());
            }

            let mut resumed = optimizer_for(&cfg);
            build_scheduler(resumed.as_mut(), 10, 20, Some(k), &cfg).unwrap();

            assert_eq!(stepped.param_groups()[0].lr, resumed.param_groups()[0].lr, "k = {k}");
        }
    }

    #[test]
    fn warmup_only_when_enabled_and_not_one_cycle() {
        let mut cfg = OptimizerConfig::new("adam", 0.001);
        let mut opt = optimizer_for(&cfg);
        assert!(build_scheduler(opt.as_mut(), 5, 10, None, &cfg).unwrap().1.is_none());

        cfg.warmup_enabled = true;
        let (primary, warmup) = build_scheduler(opt.as_mut(), 5, 10, None, &cfg).unwrap();
        assert_eq!(primary.name(), "step_decay");
        assert_eq!(warmup.map(|w| w.name()), Some("cosine_warmup"));

        cfg.name = "adam_onecycle".into();
        let (primary, warmup) = build_scheduler(opt.as_mut(), 5, 10, None, &cfg).unwrap();
        assert_eq!(primary.name(), "one_cycle");
        assert!(warmup.is_none());
    }

    #[test]
    fn one_cycle_starts_low_and_drives_beta1() {
        let cfg = OptimizerConfig::new("adam_onecycle", 0.01);
        let mut opt = optimizer_for(&cfg);
        let (mut sched, _) = build_scheduler(opt.as_mut(), 10, 10, None, &cfg).unwrap();

        assert!((opt.param_groups()[0].lr - 0.001).abs() < 1e-9);
        assert_eq!(opt.param_groups()[0].momentum_term(), Some(0.95));

        sched.step_batch(opt.as_mut(), 40);
        assert!((opt.param_groups()[0].lr - 0.01).abs() < 1e-9);
        assert!((opt.param_groups()[0].betas.unwrap().0 - 0.85).abs() < 1e-6);
    }
}
