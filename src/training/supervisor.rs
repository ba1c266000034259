use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::{
    epoch::{train_one_epoch, EpochOptions},
    TrainingProgress,
};
use crate::{
    checkpoint::CheckpointManager,
    data::BatchSource,
    error::Result,
    metrics::MetricSink,
    model::{Device, Model},
    optimization::Optimizer,
    schedule::LrScheduler,
};

/// Run-level settings for `train_model`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorOptions {
    pub total_epochs: usize,
    /// Epochs that run under the warmup schedule, when one is given.
    pub warmup_epochs: usize,
    pub grad_norm_clip: f32,
    pub rank: usize,
    /// A checkpoint is written after every epoch `e` with `(e + 1) % interval == 0`.
    pub ckpt_save_interval: usize,
}

/// What the supervisor owns besides the model and optimizer.
pub struct TrainingParts<'a, L: ?Sized> {
    pub loader: &'a mut L,
    pub scheduler: &'a mut dyn LrScheduler,
    pub warmup: Option<&'a mut dyn LrScheduler>,
    pub device: &'a dyn Device,
    pub sink: Option<&'a mut dyn MetricSink>,
    /// Where rank 0 writes checkpoints; `None` disables checkpointing.
    pub checkpoints: Option<&'a CheckpointManager>,
}

/// Trains from `start` until `opts.total_epochs` epochs are done.
///
/// Epochs below `opts.warmup_epochs` run under the warmup schedule if there
/// is one, every other epoch under the primary schedule. The sampler behind
/// the loader (if any) is told about every new epoch before it starts.
///
/// # Returns
/// The progress after the last epoch.
pub fn train_model<M, L>(
    model: &mut M,
    optimizer: &mut dyn Optimizer,
    parts: TrainingParts<'_, L>,
    start: TrainingProgress,
    opts: &SupervisorOptions,
) -> Result<TrainingProgress>
where
    M: Model + ?Sized,
    L: BatchSource + ?Sized,
{
    let TrainingParts {
        loader,
        scheduler,
        mut warmup,
        device,
        mut sink,
        checkpoints,
    } = parts;

    let primary = opts.rank == 0;
    let bars = if primary {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };

    let remaining = opts.total_epochs.saturating_sub(start.epoch);
    let tbar = bars.add(ProgressBar::new(remaining as u64));
    if let Ok(style) = ProgressStyle::with_template("epochs {bar:30} {pos}/{len} {msg}") {
        tbar.set_style(style);
    }

    let epoch_opts = EpochOptions {
        total_it_each_epoch: loader.len(),
        grad_norm_clip: opts.grad_norm_clip,
        rank: opts.rank,
    };

    let mut progress = start;
    for cur_epoch in start.epoch..opts.total_epochs {
        if let Some(sampler) = loader.sampler() {
            sampler.set_epoch(cur_epoch);
        }

        let cur_scheduler: &mut dyn LrScheduler = match warmup.as_deref_mut() {
            Some(w) if cur_epoch < opts.warmup_epochs => w,
            _ => &mut *scheduler,
        };

        log::info!(
            epoch = cur_epoch,
            schedule = cur_scheduler.name(),
            it = progress.accumulated_iter;
            "starting epoch"
        );

        let report = train_one_epoch(
            model,
            optimizer,
            &mut *loader,
            cur_scheduler,
            progress,
            &epoch_opts,
            device,
            sink.as_deref_mut(),
            &bars,
        )?;

        let trained_epoch = cur_epoch + 1;
        progress = TrainingProgress {
            epoch: trained_epoch,
            accumulated_iter: report.progress.accumulated_iter,
        };

        tbar.inc(1);
        tbar.set_message(format!(
            "loss={:.4} lr={:.2e} grad_norm={:.3}",
            report.last_loss, report.last_lr, report.last_grad_norm
        ));
        log::info!(
            epoch = trained_epoch,
            it = progress.accumulated_iter,
            loss = report.last_loss,
            restarts = report.restarts;
            "finished epoch"
        );

        if primary && trained_epoch % opts.ckpt_save_interval.max(1) == 0 {
            if let Some(mgr) = checkpoints {
                mgr.save(&*model, &*optimizer, trained_epoch, progress.accumulated_iter)?;
            }
        }
    }

    if let Some(sink) = sink.as_deref_mut() {
        sink.flush()?;
    }
    tbar.finish();

    Ok(progress)
}
