use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::optimizer::{
    check_params, single_group, state_kind_mismatch, zeros_like, Optimizer, OptimizerState,
    ParamGroup,
};
use crate::{
    error::Result,
    params::{bits, Parameter, Tensor},
};

/// Adam internals as stored in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub param_groups: Vec<ParamGroup>,
    pub step: u64,
    #[serde(with = "bits::tensors")]
    pub exp_avg: Vec<Tensor>,
    #[serde(with = "bits::tensors")]
    pub exp_avg_sq: Vec<Tensor>,
}

#[derive(Debug)]
pub struct Adam {
    group: [ParamGroup; 1],
    epsilon: f32,
    step: u64,
    v: Vec<Tensor>,
    s: Vec<Tensor>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `params` - The parameters this instance will update; moment buffers are sized to them.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `betas`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `weight_decay` - L2 penalty folded into the gradient.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(
        params: &[Parameter],
        learning_rate: f32,
        betas: (f32, f32),
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        let mut group = ParamGroup::new(learning_rate, weight_decay);
        group.betas = Some(betas);

        Self {
            group: [group],
            epsilon,
            step: 0,
            v: zeros_like(params),
            s: zeros_like(params),
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.step
    }
}

impl Optimizer for Adam {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.group
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.group
    }

    fn step(&mut self, params: &mut [Parameter]) -> Result<()> {
        check_params(params, &self.v)?;

        let ParamGroup {
            lr,
            weight_decay: wd,
            ..
        } = self.group[0];
        let (b1, b2) = self.group[0].betas.unwrap_or((0.9, 0.999));
        let eps = self.epsilon;

        self.step += 1;
        let t = i32::try_from(self.step).unwrap_or(i32::MAX);
        let bc1 = 1. - b1.powi(t);
        let bc2 = 1. - b2.powi(t);
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|((p, v), s)| {
                let Parameter { value, grad, .. } = p;
                Zip::from(value)
                    .and(&*grad)
                    .and(v)
                    .and(s)
                    .for_each(|w, &g, v, s| {
                        let g = g + wd * *w;
                        *v = b1 * *v + (1. - b1) * g;
                        *s = b2 * *s + (1. - b2) * g.powi(2);
                        *w -= step_size * *v / (s.sqrt() + eps);
                    });
            });

        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState::Adam(AdamState {
            param_groups: self.group.to_vec(),
            step: self.step,
            exp_avg: self.v.clone(),
            exp_avg_sq: self.s.clone(),
        })
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        let state = match state {
            OptimizerState::Adam(state) => state,
            other => return Err(state_kind_mismatch("adam", &other)),
        };
        let group = single_group(state.param_groups)?;

        self.group = [group];
        self.step = state.step;
        self.v = state.exp_avg;
        self.s = state.exp_avg_sq;
        Ok(())
    }
}
