use serde::{Deserialize, Serialize};

use super::{adam::AdamState, gradient_descent_with_momentum::MomentumState};
use crate::{
    error::{Result, TrainErr},
    params::{Parameter, Tensor},
};

/// Hyperparameters shared by a group of parameters.
///
/// Schedules write `lr` and the momentum term here; optimizers read them on
/// every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub lr: f32,
    /// The rate the group was created with; schedules scale from it.
    pub initial_lr: f32,
    pub weight_decay: f32,
    #[serde(default)]
    pub momentum: Option<f32>,
    #[serde(default)]
    pub betas: Option<(f32, f32)>,
}

impl ParamGroup {
    pub fn new(lr: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            initial_lr: lr,
            weight_decay,
            momentum: None,
            betas: None,
        }
    }

    /// The momentum-like coefficient: `momentum` for SGD, `beta1` for Adam.
    pub fn momentum_term(&self) -> Option<f32> {
        self.momentum.or(self.betas.map(|(b1, _)| b1))
    }

    /// Writes the momentum-like coefficient, whichever form the group uses.
    pub fn set_momentum_term(&mut self, value: f32) {
        if let Some(m) = self.momentum.as_mut() {
            *m = value;
        }
        if let Some((b1, _)) = self.betas.as_mut() {
            *b1 = value;
        }
    }
}

/// Serializable optimizer internals, including the parameter groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    Adam(AdamState),
    Sgd(MomentumState),
}

impl OptimizerState {
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerState::Adam(_) => "adam",
            OptimizerState::Sgd(_) => "sgd",
        }
    }

    pub fn param_groups(&self) -> &[ParamGroup] {
        match self {
            OptimizerState::Adam(s) => &s.param_groups,
            OptimizerState::Sgd(s) => &s.param_groups,
        }
    }
}

/// Defines the strategy for updating model parameters from their gradients.
pub trait Optimizer {
    /// A directly exposed learning rate, for optimizers that keep a single
    /// rate outside their parameter groups.
    fn lr(&self) -> Option<f32> {
        None
    }

    fn param_groups(&self) -> &[ParamGroup];

    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Applies one update to `params` using their accumulated gradients.
    ///
    /// # Errors
    /// `ShapeMismatch` if `params` differs from the set this optimizer was
    /// built for.
    fn step(&mut self, params: &mut [Parameter]) -> Result<()>;

    fn state_dict(&self) -> OptimizerState;

    /// Restores internals saved by `state_dict`.
    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()>;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn lr(&self) -> Option<f32> {
        (**self).lr()
    }

    fn param_groups(&self) -> &[ParamGroup] {
        (**self).param_groups()
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        (**self).param_groups_mut()
    }

    fn step(&mut self, params: &mut [Parameter]) -> Result<()> {
        (**self).step(params)
    }

    fn state_dict(&self) -> OptimizerState {
        (**self).state_dict()
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        (**self).load_state_dict(state)
    }
}

/// Reads the rate currently in effect.
///
/// The optimizer's own rate wins; otherwise the first parameter group's
/// rate is used.
pub fn current_lr<O: Optimizer + ?Sized>(optimizer: &O) -> f32 {
    optimizer
        .lr()
        .or_else(|| optimizer.param_groups().first().map(|g| g.lr))
        .unwrap_or_default()
}

/// Allocates one zeroed buffer per parameter.
pub(super) fn zeros_like(params: &[Parameter]) -> Vec<Tensor> {
    params
        .iter()
        .map(|p| Tensor::zeros(p.value.raw_dim()))
        .collect()
}

/// Ensures `params` matches the buffers sized at construction.
pub(super) fn check_params(params: &[Parameter], buffers: &[Tensor]) -> Result<()> {
    if params.len() != buffers.len() {
        return Err(TrainErr::ShapeMismatch {
            what: "parameter set",
            got: params.len(),
            expected: buffers.len(),
        });
    }

    for (p, b) in params.iter().zip(buffers) {
        if p.value.shape() != b.shape() || p.grad.shape() != b.shape() {
            return Err(TrainErr::ShapeMismatch {
                what: "parameter",
                got: p.value.len(),
                expected: b.len(),
            });
        }
    }

    Ok(())
}

pub(super) fn single_group(groups: Vec<ParamGroup>) -> Result<ParamGroup> {
    let [group] = <[ParamGroup; 1]>::try_from(groups).map_err(|groups| TrainErr::ShapeMismatch {
        what: "param groups",
        got: groups.len(),
        expected: 1,
    })?;
    Ok(group)
}

pub(super) fn state_kind_mismatch(expected: &str, got: &OptimizerState) -> TrainErr {
    TrainErr::InvalidConfig(format!(
        "cannot load {} optimizer state into {expected} optimizer",
        got.kind()
    ))
}
