//! A small linear model over image pairs, used by the binary and in tests.

use ndarray::{Array1, Array2, ArrayD, Ix1, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    data::{Batch, InMemoryDataset, Sample},
    error::{Result, TrainErr},
    model::{ForwardOutput, LossComponents, Model},
    params::{Parameter, Tensor},
};

/// Coefficient of the L2 penalty on `w`, reported as the `uni_xy` term.
const WEIGHT_PENALTY: f32 = 1e-3;

/// Predicts a scalar target from the pixel difference of two images:
///
/// yhat = w . flatten(a - b) + b
///
/// Loss is the MSE plus a small L2 penalty on `w`.
#[derive(Debug, Clone)]
pub struct PairRegressor {
    /// `[w, bias]`.
    params: Vec<Parameter>,
    training: bool,
    /// Features and residuals of the last forward pass.
    cache: Option<(Array2<f32>, Array1<f32>)>,
}

impl PairRegressor {
    /// A zero-initialised model for inputs with `features` values each.
    pub fn new(features: usize) -> Self {
        Self {
            params: vec![
                Parameter::zeros("w", &[features]),
                Parameter::zeros("bias", &[1]),
            ],
            training: false,
            cache: None,
        }
    }

    pub fn features(&self) -> usize {
        self.params[0].len()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn weights(&self) -> Result<(Array1<f32>, f32)> {
        let w = self.params[0]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| shape_err("w rank", self.params[0].value.ndim(), 1))?
            .to_owned();
        let bias = self.params[1].value.iter().next().copied().unwrap_or(0.);
        Ok((w, bias))
    }

    fn features_of(&self, batch: &Batch) -> Result<Array2<f32>> {
        let n = batch.len();
        let d = self.features();

        if batch.input_a.len() != n * d {
            return Err(shape_err("input features", batch.input_a.len(), n * d));
        }

        let diff = &batch.input_a - &batch.input_b;
        diff.into_shape_with_order((n, d))
            .map_err(|_| shape_err("input features", batch.input_b.len(), n * d))
    }
}

fn shape_err(what: &'static str, got: usize, expected: usize) -> TrainErr {
    TrainErr::ShapeMismatch {
        what,
        got,
        expected,
    }
}

impl Model for PairRegressor {
    fn train(&mut self) {
        self.training = true;
    }

    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput> {
        let x = self.features_of(batch)?;
        let (w, bias) = self.weights()?;

        let y = batch.target.iter().copied().collect::<Array1<f32>>();
        if y.len() != x.nrows() {
            return Err(shape_err("target", y.len(), x.nrows()));
        }

        let err = x.dot(&w) + bias - &y;
        let mse = err.mapv(|e| e * e).mean().unwrap_or(0.);
        let penalty = WEIGHT_PENALTY * w.dot(&w);

        self.cache = Some((x, err));

        Ok(ForwardOutput {
            loss: mse + penalty,
            components: LossComponents {
                key_dist: mse,
                uni_xy: penalty,
                ..LossComponents::default()
            },
        })
    }

    fn backward(&mut self) -> Result<()> {
        let Some((x, err)) = self.cache.take() else {
            return Ok(());
        };
        let (w, _) = self.weights()?;

        let two_over_n = 2. / err.len().max(1) as f32;
        let dw = x.t().dot(&err) * two_over_n + w * (2. * WEIGHT_PENALTY);
        let db = err.sum() * two_over_n;

        self.params[0].grad += &dw.into_dyn();
        self.params[1].grad += db;
        Ok(())
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }
}

/// `n` random `(1, side, side)` image pairs whose target is a fixed linear
/// function of their difference.
pub fn synthetic_dataset(n: usize, side: usize, seed: u64) -> Result<InMemoryDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let d = side * side;
    let truth: Vec<f32> = (0..d).map(|_| rng.random_range(-1.0..1.0)).collect();

    let samples = (0..n)
        .map(|_| {
            let a: Vec<f32> = (0..d).map(|_| rng.random_range(0.0..1.0)).collect();
            let b: Vec<f32> = (0..d).map(|_| rng.random_range(0.0..1.0)).collect();
            let y = a
                .iter()
                .zip(&b)
                .zip(&truth)
                .map(|((a, b), t)| (a - b) * t)
                .sum::<f32>()
                + 0.5;

            Ok(Sample {
                input_a: image(side, a)?,
                input_b: image(side, b)?,
                target: ArrayD::from_elem(IxDyn(&[1]), y),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    InMemoryDataset::new(samples)
}

fn image(side: usize, pixels: Vec<f32>) -> Result<Tensor> {
    let len = pixels.len();
    ArrayD::from_shape_vec(IxDyn(&[1, side, side]), pixels)
        .map_err(|_| shape_err("image", len, side * side))
}
