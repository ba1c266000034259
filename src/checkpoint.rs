//! Checkpoint persistence and retention for training runs.
//!
//! A checkpoint is a single `checkpoint_epoch_<N>.pth` file holding the
//! model parameters, the optimizer internals and the progress counters.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TrainErr},
    model::Model,
    optimization::{Optimizer, OptimizerState},
    params::{bits, StateDict},
    training::TrainingProgress,
};

pub const CHECKPOINT_PREFIX: &str = "checkpoint_epoch_";
pub const CHECKPOINT_EXT: &str = "pth";

/// Everything needed to resume training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub it: u64,
    #[serde(with = "bits::state_dict")]
    pub model_state: StateDict,
    pub optimizer_state: OptimizerState,
}

impl Checkpoint {
    pub fn progress(&self) -> TrainingProgress {
        TrainingProgress {
            epoch: self.epoch,
            accumulated_iter: self.it,
        }
    }
}

/// Captures the live model and optimizer.
///
/// Replicated models hand back their replica's state in host memory; plain
/// models hand back their state as is.
pub fn checkpoint_state<M, O>(model: &M, optimizer: &O, epoch: usize, it: u64) -> Checkpoint
where
    M: Model + ?Sized,
    O: Optimizer + ?Sized,
{
    Checkpoint {
        epoch,
        it,
        model_state: model.extract_state(),
        optimizer_state: optimizer.state_dict(),
    }
}

/// Writes `state` to `<filename>.pth`.
///
/// The record is written to a sibling temporary file first and renamed into
/// place, so a crash never leaves a truncated checkpoint under the final name.
/// A failed write removes the temporary file again.
pub fn save_checkpoint(state: &Checkpoint, filename: &Path) -> Result<PathBuf> {
    let path = with_extension(filename, CHECKPOINT_EXT);
    let tmp = with_extension(filename, "pth.tmp");

    if let Err(e) = write_record(&tmp, state) {
        let _ = fs::remove_file(&tmp);
        return Err(TrainErr::checkpoint_io(&tmp, e));
    }

    fs::rename(&tmp, &path).map_err(|e| TrainErr::checkpoint_io(&path, e))?;
    Ok(path)
}

fn write_record(path: &Path, state: &Checkpoint) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut out, state)?;
    out.flush()
}

/// Reads a checkpoint written by `save_checkpoint`.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let file = File::open(path).map_err(|e| TrainErr::checkpoint_io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn with_extension(filename: &Path, ext: &str) -> PathBuf {
    let mut name = filename.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Parses `<N>` out of `checkpoint_epoch_<N>.pth`; `None` for any other name.
fn checkpoint_epoch(path: &Path) -> Option<Option<usize>> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_EXT)?
        .strip_suffix('.')?;
    Some(stem.parse().ok())
}

/// Saves checkpoints into one directory, keeping at most
/// `max_ckpt_save_num` of them.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    save_dir: PathBuf,
    max_ckpt_save_num: NonZeroUsize,
}

impl CheckpointManager {
    /// Creates the manager. Nothing touches the filesystem until the first
    /// `save` or `create_dir`.
    pub fn new(save_dir: impl Into<PathBuf>, max_ckpt_save_num: NonZeroUsize) -> Self {
        Self {
            save_dir: save_dir.into(),
            max_ckpt_save_num,
        }
    }

    /// Creates `save_dir` and its parents if missing.
    pub fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.save_dir)
            .map_err(|e| TrainErr::checkpoint_io(&self.save_dir, e))
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Path (without extension) of the checkpoint for `epoch`.
    pub fn filename_for(&self, epoch: usize) -> PathBuf {
        self.save_dir.join(format!("{CHECKPOINT_PREFIX}{epoch}"))
    }

    /// Checkpoint files in the directory, oldest modification first.
    ///
    /// Files with the same modification time are ordered by epoch. A save
    /// directory that does not exist yet holds no checkpoints.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.save_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrainErr::checkpoint_io(dir, e)),
        };

        let mut found: Vec<(SystemTime, Option<usize>, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TrainErr::checkpoint_io(dir, e))?.path();
            let Some(epoch) = checkpoint_epoch(&path) else {
                continue;
            };
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map_err(|e| TrainErr::checkpoint_io(&path, e))?;
            found.push((modified, epoch, path));
        }

        found.sort();
        Ok(found.into_iter().map(|(_, _, path)| path).collect())
    }

    /// The most recently written checkpoint, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop())
    }

    /// Deletes the oldest checkpoints so that one more file fits under the cap.
    ///
    /// # Returns
    /// The deleted paths.
    pub fn make_room(&self) -> Result<Vec<PathBuf>> {
        let existing = self.list()?;
        let max = self.max_ckpt_save_num.get();

        if existing.len() < max {
            return Ok(Vec::new());
        }

        let excess = existing.len() - max + 1;
        let removed: Vec<PathBuf> = existing.into_iter().take(excess).collect();
        for path in &removed {
            fs::remove_file(path).map_err(|e| TrainErr::checkpoint_io(path, e))?;
            log::warn!(path:? = path; "removed old checkpoint");
        }

        Ok(removed)
    }

    /// Rotates old checkpoints out and writes `checkpoint_epoch_<epoch>.pth`.
    pub fn save<M, O>(&self, model: &M, optimizer: &O, epoch: usize, it: u64) -> Result<PathBuf>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        self.create_dir()?;
        self.make_room()?;

        let state = checkpoint_state(model, optimizer, epoch, it);
        let path = save_checkpoint(&state, &self.filename_for(epoch))?;

        log::info!(epoch = epoch, it = it, path:? = path; "saved checkpoint");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Checkpoint> {
        load_checkpoint(path)
    }

    /// Restores model and optimizer from `path` and returns the progress to
    /// resume from.
    ///
    /// Either both are restored or neither is touched.
    pub fn load_into<M, O>(
        &self,
        path: &Path,
        model: &mut M,
        optimizer: &mut O,
    ) -> Result<TrainingProgress>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        let ckpt = load_checkpoint(path)?;
        let progress = ckpt.progress();

        model.check_state(&ckpt.model_state)?;
        optimizer.load_state_dict(ckpt.optimizer_state)?;
        model.load_state(&ckpt.model_state)?;

        log::info!(
            epoch = progress.epoch,
            it = progress.accumulated_iter,
            path:? = path;
            "restored checkpoint"
        );
        Ok(progress)
    }
}
