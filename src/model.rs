use serde::{Deserialize, Serialize};

use crate::{
    data::Batch,
    error::Result,
    params::{self, Parameter, StateDict, Tensor},
};

/// The five loss terms reported next to the total loss, in reporting order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossComponents {
    /// Point-correspondence distance.
    pub key_dist: f32,
    /// Uniform-distribution regularizer on predicted point coordinates.
    pub uni_xy: f32,
    /// Descriptor loss.
    pub desc: f32,
    /// Descriptor-decorrelation loss.
    pub decorr: f32,
    /// Detector-confidence term.
    pub detector: f32,
}

impl LossComponents {
    /// Metric names matching `to_array` positions.
    pub const NAMES: [&'static str; 5] = [
        "key_dist_loss",
        "uni_xy_loss",
        "desc_loss",
        "decorr_loss",
        "key_dist",
    ];

    pub fn to_array(self) -> [f32; 5] {
        [self.key_dist, self.uni_xy, self.desc, self.decorr, self.detector]
    }

    /// Pairs every term with its metric name.
    pub fn named(self) -> impl Iterator<Item = (&'static str, f32)> {
        Self::NAMES.into_iter().zip(self.to_array())
    }
}

impl From<[f32; 5]> for LossComponents {
    fn from([key_dist, uni_xy, desc, decorr, detector]: [f32; 5]) -> Self {
        Self {
            key_dist,
            uni_xy,
            desc,
            decorr,
            detector,
        }
    }
}

/// What a forward pass hands back to the epoch runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardOutput {
    pub loss: f32,
    pub components: LossComponents,
}

/// A trainable model as seen by the training driver.
///
/// The driver never inspects the network itself: it toggles training mode,
/// asks for a loss, asks for gradients, and reads/writes named parameters.
pub trait Model {
    /// Switches the model into training mode.
    fn train(&mut self);

    /// Runs the forward pass and computes the loss for `batch`.
    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput>;

    /// Accumulates gradients of the last forward pass into `parameters_mut`.
    fn backward(&mut self) -> Result<()>;

    fn parameters(&self) -> &[Parameter];

    fn parameters_mut(&mut self) -> &mut [Parameter];

    /// Whether this model is a wrapper around a replica kept in sync with
    /// other ranks.
    fn is_replicated(&self) -> bool {
        false
    }

    /// Snapshot of every parameter, keyed by name.
    fn extract_state(&self) -> StateDict {
        params::state_dict(self.parameters())
    }

    /// Fails if `load_state` would reject `state`, without touching the model.
    fn check_state(&self, state: &StateDict) -> Result<()> {
        params::check_state_dict(self.parameters(), state)
    }

    fn load_state(&mut self, state: &StateDict) -> Result<()> {
        params::load_state_dict(self.parameters_mut(), state)
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn train(&mut self) {
        (**self).train()
    }

    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput> {
        (**self).forward(batch)
    }

    fn backward(&mut self) -> Result<()> {
        (**self).backward()
    }

    fn parameters(&self) -> &[Parameter] {
        (**self).parameters()
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        (**self).parameters_mut()
    }

    fn is_replicated(&self) -> bool {
        (**self).is_replicated()
    }

    fn extract_state(&self) -> StateDict {
        (**self).extract_state()
    }

    fn check_state(&self, state: &StateDict) -> Result<()> {
        (**self).check_state(state)
    }

    fn load_state(&mut self, state: &StateDict) -> Result<()> {
        (**self).load_state(state)
    }
}

/// Where batches are computed on.
pub trait Device {
    fn name(&self) -> &str;

    /// Moves a batch onto this device.
    fn upload(&self, batch: Batch) -> Batch;

    /// Moves a tensor back into host memory.
    fn download(&self, tensor: Tensor) -> Tensor;
}

/// Host memory. Transfers are the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Host;

impl Device for Host {
    fn name(&self) -> &str {
        "host"
    }

    fn upload(&self, batch: Batch) -> Batch {
        batch
    }

    fn download(&self, tensor: Tensor) -> Tensor {
        tensor
    }
}

/// A model replica participating in data-parallel training.
///
/// Gradient synchronisation belongs to the replica; this wrapper only
/// changes how state is extracted: it always comes back in host memory.
pub struct Replicated<M, D> {
    replica: M,
    device: D,
}

impl<M: Model, D: Device> Replicated<M, D> {
    pub fn new(replica: M, device: D) -> Self {
        Self { replica, device }
    }

    pub fn replica(&self) -> &M {
        &self.replica
    }

    pub fn into_inner(self) -> M {
        self.replica
    }
}

impl<M: Model, D: Device> Model for Replicated<M, D> {
    fn train(&mut self) {
        self.replica.train()
    }

    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput> {
        self.replica.forward(batch)
    }

    fn backward(&mut self) -> Result<()> {
        self.replica.backward()
    }

    fn parameters(&self) -> &[Parameter] {
        self.replica.parameters()
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        self.replica.parameters_mut()
    }

    fn is_replicated(&self) -> bool {
        true
    }

    fn extract_state(&self) -> StateDict {
        self.replica
            .extract_state()
            .into_iter()
            .map(|(name, tensor)| (name, self.device.download(tensor)))
            .collect()
    }

    fn check_state(&self, state: &StateDict) -> Result<()> {
        self.replica.check_state(state)
    }

    fn load_state(&mut self, state: &StateDict) -> Result<()> {
        self.replica.load_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_keep_reporting_order() {
        let c = LossComponents::from([1., 2., 3., 4., 5.]);
        let named: Vec<_> = c.named().collect();

        assert_eq!(named[0], ("key_dist_loss", 1.));
        assert_eq!(named[4], ("key_dist", 5.));
        assert_eq!(c.to_array(), [1., 2., 3., 4., 5.]);
    }
}
