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

/// Momentum SGD internals as stored in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumState {
    pub param_groups: Vec<ParamGroup>,
    #[serde(with = "bits::tensors")]
    pub velocity: Vec<Tensor>,
}

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    group: [ParamGroup; 1],
    velocity: Vec<Tensor>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `params` - The parameters this instance will update; velocity buffers are sized to them.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    /// * `weight_decay` - L2 penalty folded into the gradient.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(params: &[Parameter], learning_rate: f32, momentum: f32, weight_decay: f32) -> Self {
        let mut group = ParamGroup::new(learning_rate, weight_decay);
        group.momentum = Some(momentum);

        Self {
            group: [group],
            velocity: zeros_like(params),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.group
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.group
    }

    fn step(&mut self, params: &mut [Parameter]) -> Result<()> {
        check_params(params, &self.velocity)?;

        let lr = self.group[0].lr;
        let wd = self.group[0].weight_decay;
        let mu = self.group[0].momentum.unwrap_or_default();

        params
            .iter_mut()
            .zip(self.velocity.iter_mut())
            .for_each(|(p, v)| {
                let Parameter { value, grad, .. } = p;
                Zip::from(value).and(&*grad).and(v).for_each(|w, &g, v| {
                    *v = (mu * *v) + g + wd * *w;
                    *w -= lr * *v;
                });
            });

        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState::Sgd(MomentumState {
            param_groups: self.group.to_vec(),
            velocity: self.velocity.clone(),
        })
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        let state = match state {
            OptimizerState::Sgd(state) => state,
            other => return Err(state_kind_mismatch("sgd", &other)),
        };

        self.group = [single_group(state.param_groups)?];
        self.velocity = state.velocity;
        Ok(())
    }
}
