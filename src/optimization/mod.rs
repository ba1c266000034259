mod adam;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam::{Adam, AdamState};
pub use gradient_descent_with_momentum::{GradientDescentWithMomentum, MomentumState};
pub use optimizer::{current_lr, Optimizer, OptimizerState, ParamGroup};

use crate::{
    config::{OptimizerConfig, OptimizerKind},
    error::Result,
    params::Parameter,
};

const ADAM_BETAS: (f32, f32) = (0.9, 0.999);
const ONE_CYCLE_BETA2: f32 = 0.99;
const ADAM_EPSILON: f32 = 1e-8;

/// Builds the optimizer named by `cfg`, bound to `params`.
///
/// # Errors
/// `TrainErr::UnsupportedConfiguration` if `cfg.name` is not a known optimizer.
pub fn build_optimizer(
    params: &[Parameter],
    cfg: &OptimizerConfig,
) -> Result<Box<dyn Optimizer>> {
    let lr = cfg.learning_rate;
    let wd = cfg.weight_decay;

    let optimizer: Box<dyn Optimizer> = match cfg.kind()? {
        OptimizerKind::Adam => Box::new(Adam::new(params, lr, ADAM_BETAS, ADAM_EPSILON, wd)),
        OptimizerKind::Sgd => Box::new(GradientDescentWithMomentum::new(
            params,
            lr,
            cfg.momentum,
            wd,
        )),
        // beta1 is rewritten by the one-cycle schedule on every step.
        OptimizerKind::OneCycle => Box::new(Adam::new(
            params,
            lr,
            (cfg.moms.0 as f32, ONE_CYCLE_BETA2),
            ADAM_EPSILON,
            wd,
        )),
    };

    log::info!(
        optimizer = cfg.name.as_str(),
        lr = lr,
        params = params.len();
        "built optimizer"
    );
    Ok(optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainErr;

    #[test]
    fn builds_known_kinds() {
        let params = vec![Parameter::zeros("w", &[3])];

        let sgd = build_optimizer(&params, &OptimizerConfig::new("sgd", 0.1)).unwrap();
        assert_eq!(sgd.param_groups()[0].momentum, Some(0.9));

        let adam = build_optimizer(&params, &OptimizerConfig::new("adam", 0.1)).unwrap();
        assert_eq!(adam.param_groups()[0].betas, Some(ADAM_BETAS));

        let cfg = OptimizerConfig::new("adam_onecycle", 0.1);
        let one_cycle = build_optimizer(&params, &cfg).unwrap();
        assert_eq!(one_cycle.param_groups()[0].betas, Some((0.95, ONE_CYCLE_BETA2)));
    }

    #[test]
    fn unknown_kind_is_fatal() {
        let params = vec![Parameter::zeros("w", &[3])];
        let err = build_optimizer(&params, &OptimizerConfig::new("lamb", 0.1)).err();
        assert!(matches!(err, Some(TrainErr::UnsupportedConfiguration(_))));
    }
}
