use std::num::NonZeroUsize;
use std::ops::Range;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// The slice of `0..total` positions that `rank` trains on.
///
/// Consecutive ranks get adjacent slices. When `total` does not divide
/// evenly, the leftover positions go one each to the lowest ranks.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    debug_assert!(rank < world_size);

    let (per_rank, leftover) = (total / world_size, total % world_size);
    let offset = |r: usize| r * per_rank + r.min(leftover);
    offset(rank)..offset(rank + 1)
}

/// The position of this process among cooperating training processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ShardSpec {
    /// Returns `None` when `rank` is outside `0..world_size`.
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Option<Self> {
        (rank < world_size.get()).then_some(Self { rank, world_size })
    }

    /// A single-process run.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: NonZeroUsize::MIN,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size.get())
    }

    /// Rank 0 owns console output, metric files and checkpoints.
    #[inline]
    pub fn is_primary(self) -> bool {
        self.rank == 0
    }
}

/// A sampler whose ordering depends on the epoch index.
pub trait EpochSampler {
    fn set_epoch(&mut self, epoch: usize);
}

/// Deals each rank a disjoint slice of a per-epoch shuffled index order.
///
/// All ranks share `seed`, so after `set_epoch(e)` they agree on the
/// permutation and only differ in which slice they take.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    shard: ShardSpec,
    seed: u64,
    shuffle: bool,
    epoch: usize,
}

impl DistributedSampler {
    pub fn new(shard: ShardSpec, seed: u64, shuffle: bool) -> Self {
        Self {
            shard,
            seed,
            shuffle,
            epoch: 0,
        }
    }

    #[inline]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Number of indices this rank receives out of `total`.
    #[inline]
    pub fn num_samples(&self, total: usize) -> usize {
        self.shard.range(total).len()
    }

    /// This rank's sample indices for the current epoch.
    pub fn indices(&self, total: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..total).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
            order.shuffle(&mut rng);
        }

        order[self.shard.range(total)].to_vec()
    }
}

impl EpochSampler for DistributedSampler {
    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn slices_tile_the_dataset_evenly() {
        for world_size in 1..=6 {
            for total in 0..=20 {
                let slices: Vec<_> = (0..world_size)
                    .map(|rank| shard_range(total, rank, world_size))
                    .collect();

                assert_eq!(slices[0].start, 0);
                assert_eq!(slices[world_size - 1].end, total);
                assert!(slices.windows(2).all(|w| w[0].end == w[1].start));

                let sizes: Vec<usize> = slices.iter().map(|r| r.len()).collect();
                let descending = sizes.windows(2).all(|w| w[0] >= w[1]);
                assert!(descending, "{total}/{world_size}: {sizes:?}");
                assert!(sizes[0] - sizes[world_size - 1] <= 1);
            }
        }
        assert_eq!(shard_range(7, 3, 4), 6..7);
    }

    #[test]
    fn shard_spec_rejects_out_of_range_rank() {
        assert!(ShardSpec::new(3, nz(3)).is_none());
        assert!(ShardSpec::new(0, nz(3)).unwrap().is_primary());
    }

    #[test]
    fn ranks_partition_the_epoch_order() {
        let mut all: Vec<usize> = (0..3)
            .flat_map(|rank| {
                let mut s = DistributedSampler::new(ShardSpec::new(rank, nz(3)).unwrap(), 7, true);
                s.set_epoch(4);
                s.indices(10)
            })
            .collect();

        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn set_epoch_reshuffles() {
        let mut s = DistributedSampler::new(ShardSpec::single(), 42, true);
        let first = s.indices(64);
        s.set_epoch(1);
        assert_ne!(first, s.indices(64));

        s.set_epoch(0);
        assert_eq!(first, s.indices(64));
    }

    #[test]
    fn unshuffled_order_is_identity() {
        let s = DistributedSampler::new(ShardSpec::new(1, nz(2)).unwrap(), 0, false);
        assert_eq!(s.indices(5), vec![3, 4]);
    }
}
