#![allow(dead_code)]

use std::num::NonZeroUsize;

use indicatif::{MultiProgress, ProgressDrawTarget};
use ndarray::{ArrayD, IxDyn};
use unsuper_train::{
    data::{Batch, BatchSource, DataLoader, DistributedSampler, EpochSampler, ShardSpec},
    model::{ForwardOutput, LossComponents, Model},
    optimization::Optimizer,
    params::Parameter,
    regressor::synthetic_dataset,
    schedule::LrScheduler,
    Result,
};

pub fn hidden_bars() -> MultiProgress {
    MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
}

/// Loader over `(n, 1, 4, 4)` image pairs from the synthetic dataset.
pub fn image_loader(samples: usize, batch_size: usize) -> DataLoader {
    let dataset = synthetic_dataset(samples, 4, 7).unwrap();
    let sampler = DistributedSampler::new(ShardSpec::single(), 7, false);
    DataLoader::new(dataset, sampler, NonZeroUsize::new(batch_size).unwrap(), false)
}

/// Remembers every epoch it was told about.
#[derive(Debug, Default)]
pub struct RecordingSampler {
    pub epochs: Vec<usize>,
}

impl EpochSampler for RecordingSampler {
    fn set_epoch(&mut self, epoch: usize) {
        self.epochs.push(epoch);
    }
}

/// Yields `batches_per_pass` tiny batches per pass and counts resets.
#[derive(Debug, Default)]
pub struct CountingLoader {
    pub batches_per_pass: usize,
    pub yielded: usize,
    pub resets: usize,
    pub sampler: RecordingSampler,
}

impl CountingLoader {
    pub fn new(batches_per_pass: usize) -> Self {
        Self {
            batches_per_pass,
            ..Self::default()
        }
    }
}

impl BatchSource for CountingLoader {
    fn len(&self) -> usize {
        self.batches_per_pass
    }

    fn reset(&mut self) {
        self.yielded = 0;
        self.resets += 1;
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.yielded == self.batches_per_pass {
            return Ok(None);
        }
        self.yielded += 1;

        let field = ArrayD::from_elem(IxDyn(&[1, 2]), self.yielded as f32);
        Ok(Some(Batch {
            input_a: field.clone(),
            input_b: field,
            target: ArrayD::zeros(IxDyn(&[1, 1])),
        }))
    }

    fn sampler(&mut self) -> Option<&mut dyn EpochSampler> {
        Some(&mut self.sampler)
    }
}

/// A model whose loss and gradient are fixed up front.
#[derive(Debug)]
pub struct ScriptedModel {
    pub params: Vec<Parameter>,
    pub grad: Vec<f32>,
    pub loss: f32,
    pub forwards: usize,
    pub trained: bool,
}

impl ScriptedModel {
    pub fn new(grad: Vec<f32>) -> Self {
        Self {
            params: vec![Parameter::zeros("w", &[grad.len()])],
            grad,
            loss: 1.5,
            forwards: 0,
            trained: false,
        }
    }
}

impl Model for ScriptedModel {
    fn train(&mut self) {
        self.trained = true;
    }

    fn forward(&mut self, _batch: &Batch) -> Result<ForwardOutput> {
        self.forwards += 1;
        Ok(ForwardOutput {
            loss: self.loss,
            components: LossComponents::from([0.1, 0.2, 0.3, 0.4, 0.5]),
        })
    }

    fn backward(&mut self) -> Result<()> {
        for (g, v) in self.params[0].grad.iter_mut().zip(&self.grad) {
            *g += v;
        }
        Ok(())
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }
}

/// Records how it is driven without touching the optimizer.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub name: &'static str,
    pub batch_steps: Vec<u64>,
    pub epoch_steps: usize,
}

impl RecordingScheduler {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

impl LrScheduler for RecordingScheduler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self, _optimizer: &mut dyn Optimizer) {}

    fn step_batch(&mut self, _optimizer: &mut dyn Optimizer, accumulated_iter: u64) {
        self.batch_steps.push(accumulated_iter);
    }

    fn step_epoch(&mut self, _optimizer: &mut dyn Optimizer) {
        self.epoch_steps += 1;
    }
}
