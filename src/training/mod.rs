//! The epoch runner and the multi-epoch supervisor on top of it.

mod epoch;
mod supervisor;

pub use epoch::{train_one_epoch, EpochOptions, EpochReport};
pub use supervisor::{train_model, SupervisorOptions, TrainingParts};

use serde::{Deserialize, Serialize};

/// How far a run has got.
///
/// `epoch` counts completed epochs and `accumulated_iter` counts optimizer
/// steps since the run began, across resumptions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub epoch: usize,
    pub accumulated_iter: u64,
}

impl TrainingProgress {
    pub fn new(epoch: usize, accumulated_iter: u64) -> Self {
        Self {
            epoch,
            accumulated_iter,
        }
    }
}
