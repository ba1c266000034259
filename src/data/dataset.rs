use ndarray::{stack, Axis};

use crate::{
    error::{Result, TrainErr},
    params::Tensor,
};

/// A single supervised sample: an image pair and the target relating them
/// (e.g. the homography warping `input_a` into `input_b`).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input_a: Tensor,
    pub input_b: Tensor,
    pub target: Tensor,
}

/// A minimal in-memory dataset.
///
/// Every sample has the same per-field shape, so any subset can be
/// collated into a batch.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned samples.
    ///
    /// # Errors
    /// `InvalidConfig` if `samples` is empty, `ShapeMismatch` if any sample
    /// disagrees with the first one on a field's shape.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| TrainErr::InvalidConfig("dataset must be non-empty".into()))?;

        for s in &samples[1..] {
            check_shape("input_a", &s.input_a, &first.input_a)?;
            check_shape("input_b", &s.input_b, &first.input_b)?;
            check_shape("target", &s.target, &first.target)?;
        }

        Ok(Self { samples })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the sample at `idx`, if any.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Sample> {
        self.samples.get(idx)
    }

    /// Stacks the samples at `indices` along a new leading batch axis.
    pub fn collate(&self, indices: &[usize]) -> Result<Batch> {
        let picked = indices
            .iter()
            .map(|&i| {
                self.samples.get(i).ok_or(TrainErr::ShapeMismatch {
                    what: "sample index",
                    got: i,
                    expected: self.samples.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let field = |f: fn(&Sample) -> &Tensor| -> Result<Tensor> {
            let views: Vec<_> = picked.iter().map(|s| f(s).view()).collect();
            stack(Axis(0), &views).map_err(|_| TrainErr::ShapeMismatch {
                what: "batch",
                got: views.len(),
                expected: indices.len(),
            })
        };

        Ok(Batch {
            input_a: field(|s| &s.input_a)?,
            input_b: field(|s| &s.input_b)?,
            target: field(|s| &s.target)?,
        })
    }
}

fn check_shape(what: &'static str, got: &Tensor, expected: &Tensor) -> Result<()> {
    if got.shape() == expected.shape() {
        return Ok(());
    }

    Err(TrainErr::ShapeMismatch {
        what,
        got: got.len(),
        expected: expected.len(),
    })
}

/// A collated batch: every field carries a leading batch axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input_a: Tensor,
    pub input_b: Tensor,
    pub target: Tensor,
}

impl Batch {
    #[inline]
    pub fn len(&self) -> usize {
        self.input_a.shape().first().copied().unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
