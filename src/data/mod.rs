pub mod dataloader;
pub mod dataset;
pub mod shard;

pub use dataloader::{BatchSource, DataLoader};
pub use dataset::{Batch, InMemoryDataset, Sample};
pub use shard::{shard_range, DistributedSampler, EpochSampler, ShardSpec};
