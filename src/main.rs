use std::{env, num::NonZeroUsize, path::PathBuf};

use anyhow::{anyhow, bail, Context};
use log::info;

use unsuper_train::{
    build_optimizer, build_scheduler,
    checkpoint::CheckpointManager,
    config::TrainingConfig,
    data::{BatchSource, DataLoader, DistributedSampler, ShardSpec},
    metrics::{JsonlSink, MetricSink},
    model::{Host, Model, Replicated},
    regressor::{synthetic_dataset, PairRegressor},
    schedule::LrScheduler,
    training::{train_model, SupervisorOptions, TrainingParts, TrainingProgress},
};

const DATASET_SIZE: usize = 512;
const IMAGE_SIDE: usize = 4;
const DEFAULT_SEED: u64 = 42;

fn env_usize(key: &str, default: usize) -> anyhow::Result<usize> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key}={v} is not a number")),
        Err(_) => Ok(default),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <config.json> <ckpt_dir>", args[0]);
    }
    let cfg = TrainingConfig::from_path(&args[1])
        .with_context(|| format!("loading config {}", args[1]))?;
    let ckpt_dir = PathBuf::from(&args[2]);

    let rank = env_usize("RANK", 0)?;
    let world_size = NonZeroUsize::new(env_usize("WORLD_SIZE", 1)?)
        .ok_or_else(|| anyhow!("WORLD_SIZE must be at least 1"))?;
    let shard = ShardSpec::new(rank, world_size)
        .ok_or_else(|| anyhow!("RANK {rank} out of range for WORLD_SIZE {world_size}"))?;
    let seed = cfg.seed.unwrap_or(DEFAULT_SEED);

    let dataset = synthetic_dataset(DATASET_SIZE, IMAGE_SIDE, seed)?;
    let sampler = DistributedSampler::new(shard, seed, true);
    let mut loader = DataLoader::new(dataset, sampler, cfg.batch_size, false);

    let features = IMAGE_SIDE * IMAGE_SIDE;
    let mut model: Box<dyn Model> = if world_size.get() > 1 {
        Box::new(Replicated::new(PairRegressor::new(features), Host))
    } else {
        Box::new(PairRegressor::new(features))
    };
    let mut optimizer = build_optimizer(model.parameters(), &cfg.optimization)?;

    let checkpoints = CheckpointManager::new(&ckpt_dir, cfg.max_ckpt_save_num);
    let start = match checkpoints.latest()? {
        Some(path) => checkpoints.load_into(&path, &mut model, optimizer.as_mut())?,
        None => TrainingProgress::default(),
    };
    if start.epoch >= cfg.epochs {
        info!("nothing to do: {} of {} epochs already trained", start.epoch, cfg.epochs);
        return Ok(());
    }

    let last_epoch = (start.epoch > 0).then_some(start.epoch);
    let (mut scheduler, mut warmup) = build_scheduler(
        optimizer.as_mut(),
        loader.len(),
        cfg.epochs,
        last_epoch,
        &cfg.optimization,
    )?;

    let mut sink = if shard.is_primary() {
        checkpoints.create_dir()?;
        Some(JsonlSink::append(ckpt_dir.join("events.jsonl"))?)
    } else {
        None
    };

    let opts = SupervisorOptions {
        total_epochs: cfg.epochs,
        warmup_epochs: cfg.optimization.warmup_epochs,
        grad_norm_clip: cfg.optimization.grad_norm_clip,
        rank,
        ckpt_save_interval: cfg.ckpt_save_interval.get(),
    };
    let parts = TrainingParts {
        loader: &mut loader,
        scheduler: scheduler.as_mut(),
        warmup: warmup.as_mut().map(|w| w.as_mut() as &mut dyn LrScheduler),
        device: &Host,
        sink: sink.as_mut().map(|s| s as &mut dyn MetricSink),
        checkpoints: Some(&checkpoints),
    };

    info!(
        "training on rank {rank}/{world_size} from epoch {} (it {})",
        start.epoch, start.accumulated_iter
    );
    let done = train_model(&mut model, optimizer.as_mut(), parts, start, &opts)?;
    info!(
        "finished {} epochs after {} iterations",
        done.epoch, done.accumulated_iter
    );

    Ok(())
}
