use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::TrainingProgress;
use crate::{
    data::{Batch, BatchSource},
    error::{Result, TrainErr},
    metrics::{make_grid, MetricSink},
    model::{Device, Model},
    optimization::{current_lr, Optimizer},
    params::{clip_grad_norm, zero_grads},
    schedule::LrScheduler,
};

/// Knobs that stay fixed across the epochs of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochOptions {
    /// Optimizer steps per epoch; may exceed the loader's length.
    pub total_it_each_epoch: usize,
    /// Maximum global gradient norm.
    pub grad_norm_clip: f32,
    /// This process's rank; only rank 0 reports.
    pub rank: usize,
}

impl EpochOptions {
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }
}

/// Outcome of one call to `train_one_epoch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// Progress after the epoch; only `accumulated_iter` is advanced here.
    pub progress: TrainingProgress,
    /// How many times the loader ran dry and was started over.
    pub restarts: usize,
    pub last_loss: f32,
    pub last_lr: f32,
    pub last_grad_norm: f32,
}

/// Runs `opts.total_it_each_epoch` optimizer steps.
///
/// The loader is started over from the beginning whenever it runs dry, and
/// also up front when one epoch is exactly one pass. `scheduler` sees every
/// step through `step_batch` and the end of the epoch through `step_epoch`.
///
/// # Errors
/// `TrainErr::EmptyLoader` if a freshly reset loader yields nothing, plus
/// anything the model, optimizer or sink reports.
#[allow(clippy::too_many_arguments)]
pub fn train_one_epoch<M, L>(
    model: &mut M,
    optimizer: &mut dyn Optimizer,
    loader: &mut L,
    scheduler: &mut dyn LrScheduler,
    mut progress: TrainingProgress,
    opts: &EpochOptions,
    device: &dyn Device,
    mut sink: Option<&mut (dyn MetricSink + '_)>,
    bars: &MultiProgress,
) -> Result<EpochReport>
where
    M: Model + ?Sized,
    L: BatchSource + ?Sized,
{
    let primary = opts.is_primary();
    let total = opts.total_it_each_epoch;

    if total == loader.len() {
        loader.reset();
    }

    let pbar = bars.add(ProgressBar::new(total as u64));
    if let Ok(style) = ProgressStyle::with_template("train {bar:30} {pos}/{len} {msg}") {
        pbar.set_style(style);
    }

    let mut report = EpochReport {
        progress,
        restarts: 0,
        last_loss: 0.,
        last_lr: 0.,
        last_grad_norm: 0.,
    };

    for cur_it in 0..total {
        let batch = match loader.next_batch()? {
            Some(batch) => batch,
            None => {
                loader.reset();
                report.restarts += 1;
                log::info!(cur_it = cur_it, restarts = report.restarts; "new iters");
                loader.next_batch()?.ok_or(TrainErr::EmptyLoader)?
            }
        };

        if primary && cur_it == 0 {
            if let Some(sink) = sink.as_deref_mut() {
                log_input_grids(sink, &batch, progress.accumulated_iter)?;
            }
        }

        let batch = device.upload(batch);

        scheduler.step_batch(optimizer, progress.accumulated_iter);
        let cur_lr = current_lr(&*optimizer);

        model.train();
        zero_grads(model.parameters_mut());

        let out = model.forward(&batch)?;
        model.backward()?;
        let grad_norm = clip_grad_norm(model.parameters_mut(), opts.grad_norm_clip);
        optimizer.step(model.parameters_mut())?;

        progress.accumulated_iter += 1;

        report.last_loss = out.loss;
        report.last_lr = cur_lr;
        report.last_grad_norm = grad_norm;

        if !primary {
            continue;
        }

        pbar.inc(1);
        pbar.set_message(format!(
            "total_it={} loss={:.4} lr={:.2e} grad_norm={:.3}",
            progress.accumulated_iter, out.loss, cur_lr, grad_norm
        ));

        if let Some(sink) = sink.as_deref_mut() {
            let step = progress.accumulated_iter;
            sink.add_scalar("train_loss", out.loss as f64, step)?;
            sink.add_scalar("learning_rate", cur_lr as f64, step)?;
            sink.add_scalar("grad_norm", grad_norm as f64, step)?;
            for (name, value) in out.components.named() {
                sink.add_scalar(name, value as f64, step)?;
            }
        }
    }

    scheduler.step_epoch(optimizer);

    pbar.finish_and_clear();
    bars.remove(&pbar);

    report.progress = progress;
    Ok(report)
}

/// Logs the first batch's inputs as image grids; inputs that are not image
/// batches are skipped.
fn log_input_grids(sink: &mut dyn MetricSink, batch: &Batch, step: u64) -> Result<()> {
    for (name, images) in [("original_images", &batch.input_a), ("homography", &batch.input_b)] {
        match make_grid(images) {
            Ok(grid) => sink.add_image(name, &grid, step)?,
            Err(e) => log::debug!(metric = name, error:% = e; "skipping image grid"),
        }
    }

    Ok(())
}
