use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{de, Deserialize, Serialize};

use crate::error::{Result, TrainErr};

/// Dense host tensor used for parameters, gradients and batches.
pub type Tensor = ArrayD<f32>;

/// Ordered mapping from parameter name to its value.
pub type StateDict = BTreeMap<String, Tensor>;

/// A named trainable tensor together with its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    /// Creates a parameter with a zeroed gradient of the same shape.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        let grad = Tensor::zeros(value.raw_dim());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn zeros(name: impl Into<String>, shape: &[usize]) -> Self {
        Self::new(name, Tensor::zeros(IxDyn(shape)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    #[inline]
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }
}

/// Zeroes the gradient of every parameter.
pub fn zero_grads(params: &mut [Parameter]) {
    params.iter_mut().for_each(Parameter::zero_grad);
}

/// Global L2 norm over all gradients.
pub fn grad_norm(params: &[Parameter]) -> f32 {
    params
        .iter()
        .flat_map(|p| p.grad.iter())
        .map(|g| g * g)
        .sum::<f32>()
        .sqrt()
}

/// Rescales all gradients so their global L2 norm does not exceed `max_norm`.
///
/// # Returns
/// The norm measured before clipping.
pub fn clip_grad_norm(params: &mut [Parameter], max_norm: f32) -> f32 {
    let total_norm = grad_norm(params);
    let clip_coef = max_norm / (total_norm + 1e-6);

    if clip_coef < 1. {
        params
            .iter_mut()
            .for_each(|p| p.grad.mapv_inplace(|g| g * clip_coef));
    }

    total_norm
}

/// Snapshots parameter values into a state dict.
pub fn state_dict(params: &[Parameter]) -> StateDict {
    params
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

/// Verifies that `state` has an entry of the right shape for every parameter.
///
/// # Errors
/// `MissingParameter` if a parameter has no entry, `ShapeMismatch` if an
/// entry has a different shape.
pub fn check_state_dict(params: &[Parameter], state: &StateDict) -> Result<()> {
    for p in params {
        let value = state
            .get(&p.name)
            .ok_or_else(|| TrainErr::MissingParameter(p.name.clone()))?;

        if value.shape() != p.value.shape() {
            return Err(TrainErr::ShapeMismatch {
                what: "parameter",
                got: value.len(),
                expected: p.value.len(),
            });
        }
    }

    Ok(())
}

/// Copies values from `state` into the matching parameters.
///
/// Nothing is written unless every parameter has a compatible entry.
pub fn load_state_dict(params: &mut [Parameter], state: &StateDict) -> Result<()> {
    check_state_dict(params, state)?;

    for p in params.iter_mut() {
        if let Some(value) = state.get(&p.name) {
            p.value.assign(value);
            p.zero_grad();
        }
    }

    Ok(())
}

/// On-disk form of a tensor: its shape plus the raw IEEE-754 bits of every
/// element in logical order. NaN payloads and infinities survive unchanged.
#[derive(Serialize, Deserialize)]
struct TensorBits {
    shape: Vec<usize>,
    bits: Vec<u32>,
}

impl From<&Tensor> for TensorBits {
    fn from(t: &Tensor) -> Self {
        Self {
            shape: t.shape().to_vec(),
            bits: t.iter().map(|v| v.to_bits()).collect(),
        }
    }
}

impl TensorBits {
    fn into_tensor<E: de::Error>(self) -> std::result::Result<Tensor, E> {
        let data = self.bits.into_iter().map(f32::from_bits).collect();
        Tensor::from_shape_vec(IxDyn(&self.shape), data).map_err(E::custom)
    }
}

/// `#[serde(with = ...)]` adapters that store tensors bit for bit.
pub mod bits {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{StateDict, Tensor, TensorBits};

    /// For `Vec<Tensor>` fields.
    pub mod tensors {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[Tensor], s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(v.iter().map(TensorBits::from))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Tensor>, D::Error> {
            Vec::<TensorBits>::deserialize(d)?
                .into_iter()
                .map(TensorBits::into_tensor)
                .collect()
        }
    }

    /// For `StateDict` fields.
    pub mod state_dict {
        use std::collections::BTreeMap;

        use super::*;

        pub fn serialize<S: Serializer>(m: &StateDict, s: S) -> Result<S::Ok, S::Error> {
            s.collect_map(m.iter().map(|(k, v)| (k, TensorBits::from(v))))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StateDict, D::Error> {
            BTreeMap::<String, TensorBits>::deserialize(d)?
                .into_iter()
                .map(|(k, t)| t.into_tensor().map(|t| (k, t)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn param_with_grad(name: &str, grad: &[f32]) -> Parameter {
        let mut p = Parameter::new(name, arr1(grad).into_dyn());
        p.grad = arr1(grad).into_dyn();
        p
    }

    #[test]
    fn clip_scales_norm_ten_down_to_one() {
        // Global norm sqrt(6^2 + 8^2) = 10.
        let mut params = vec![param_with_grad("a", &[6.0]), param_with_grad("b", &[8.0])];

        let before = clip_grad_norm(&mut params, 1.0);

        assert!((before - 10.0).abs() < 1e-5);
        assert!((grad_norm(&params) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clip_leaves_small_gradients_untouched() {
        let mut params = vec![param_with_grad("a", &[0.3, 0.4])];
        clip_grad_norm(&mut params, 1.0);
        assert_eq!(params[0].grad, arr1(&[0.3, 0.4]).into_dyn());
    }

    #[test]
    fn load_state_dict_rejects_missing_entries() {
        let mut params = vec![Parameter::zeros("w", &[2])];
        let err = load_state_dict(&mut params, &StateDict::new()).unwrap_err();
        assert!(matches!(err, TrainErr::MissingParameter(ref n) if n == "w"));
    }

    #[test]
    fn partial_mismatch_leaves_every_parameter_untouched() {
        let mut params = vec![Parameter::zeros("a", &[2]), Parameter::zeros("b", &[3])];
        let state = StateDict::from([
            ("a".to_string(), arr1(&[1.0, 2.0]).into_dyn()),
            ("b".to_string(), arr1(&[1.0]).into_dyn()),
        ]);

        let err = load_state_dict(&mut params, &state).unwrap_err();

        assert!(matches!(err, TrainErr::ShapeMismatch { got: 1, expected: 3, .. }));
        assert!(params[0].value.iter().all(|&v| v == 0.));
    }

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "bits::state_dict")]
        state: StateDict,
        #[serde(with = "bits::tensors")]
        moments: Vec<Tensor>,
    }

    #[test]
    fn non_finite_values_survive_json() {
        let weird = arr1(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY, -0.0, 1e-42]).into_dyn();
        let holder = Holder {
            state: StateDict::from([("w".to_string(), weird.clone())]),
            moments: vec![weird.clone(), Tensor::zeros(IxDyn(&[2, 0]))],
        };

        let json = serde_json::to_string(&holder).unwrap();
        let back: Holder = serde_json::from_str(&json).unwrap();

        let to_bits = |t: &Tensor| t.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(to_bits(&back.state["w"]), to_bits(&weird));
        assert_eq!(to_bits(&back.moments[0]), to_bits(&weird));
        assert_eq!(back.moments[1].shape(), &[2, 0]);
    }

    #[test]
    fn inconsistent_shape_is_a_decode_error() {
        let json = r#"{"state":{"w":{"shape":[3],"bits":[0]}},"moments":[]}"#;
        assert!(serde_json::from_str::<Holder>(json).is_err());
    }
}
