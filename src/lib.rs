pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod params;
pub mod regressor;
pub mod schedule;
pub mod training;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use config::{OptimizerConfig, OptimizerKind, TrainingConfig};
pub use error::{Result, TrainErr};
pub use model::{Device, Host, Model, Replicated};
pub use optimization::{build_optimizer, Optimizer};
pub use schedule::{build_scheduler, LrScheduler};
pub use training::{train_model, train_one_epoch, TrainingProgress};
