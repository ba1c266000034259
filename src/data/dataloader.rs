use std::num::NonZeroUsize;

use super::dataset::{Batch, InMemoryDataset};
use super::shard::{DistributedSampler, EpochSampler};
use crate::error::Result;

/// A re-iterable source of batches.
///
/// One pass yields `len()` batches; `reset` starts a new pass.
pub trait BatchSource {
    /// Batches per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass from the beginning.
    fn reset(&mut self);

    /// Returns the next batch of the current pass, or `None` if exhausted.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// The epoch-aware sampler feeding this source, if any.
    fn sampler(&mut self) -> Option<&mut dyn EpochSampler> {
        None
    }
}

/// Shard-aware loader over an in-memory dataset.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    sampler: DistributedSampler,
    batch_size: NonZeroUsize,
    drop_last: bool,
    order: Vec<usize>,
    cursor: usize,
}

impl DataLoader {
    pub fn new(
        dataset: InMemoryDataset,
        sampler: DistributedSampler,
        batch_size: NonZeroUsize,
        drop_last: bool,
    ) -> Self {
        let order = sampler.indices(dataset.len());
        Self {
            dataset,
            sampler,
            batch_size,
            drop_last,
            order,
            cursor: 0,
        }
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    #[inline]
    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }
}

impl BatchSource for DataLoader {
    fn len(&self) -> usize {
        let n = self.sampler.num_samples(self.dataset.len());
        let bs = self.batch_size.get();

        if self.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    fn reset(&mut self) {
        self.order = self.sampler.indices(self.dataset.len());
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let remaining = self.order.len().saturating_sub(self.cursor);
        let bs = self.batch_size.get();

        if remaining == 0 || (self.drop_last && remaining < bs) {
            return Ok(None);
        }

        let end = self.cursor + remaining.min(bs);
        let batch = self.dataset.collate(&self.order[self.cursor..end])?;

        self.cursor = end;
        Ok(Some(batch))
    }

    fn sampler(&mut self) -> Option<&mut dyn EpochSampler> {
        Some(&mut self.sampler)
    }
}
