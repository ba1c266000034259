mod common;

use common::{hidden_bars, image_loader, CountingLoader, RecordingScheduler, ScriptedModel};
use unsuper_train::{
    metrics::{MemorySink, MetricSink},
    model::{Host, LossComponents, Model},
    optimization::GradientDescentWithMomentum,
    params::grad_norm,
    regressor::PairRegressor,
    training::{train_one_epoch, EpochOptions, TrainingProgress},
    TrainErr,
};

fn opts(total_it_each_epoch: usize, rank: usize) -> EpochOptions {
    EpochOptions {
        total_it_each_epoch,
        grad_norm_clip: 10.,
        rank,
    }
}

fn sgd(model: &ScriptedModel) -> GradientDescentWithMomentum {
    GradientDescentWithMomentum::new(&model.params, 0.01, 0.9, 0.)
}

#[test]
fn restarts_loader_when_epoch_outlasts_it() {
    let mut model = ScriptedModel::new(vec![0.1, 0.1]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(7);
    let mut scheduler = RecordingScheduler::named("primary");

    let report = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::default(),
        &opts(20, 0),
        &Host,
        None,
        &hidden_bars(),
    )
    .unwrap();

    assert_eq!(report.restarts, 2);
    assert_eq!(loader.resets, 2);
    assert_eq!(report.progress.accumulated_iter, 20);
    assert_eq!(model.forwards, 20);
    assert!(model.trained);
}

#[test]
fn one_pass_epoch_starts_from_a_fresh_loader() {
    let mut model = ScriptedModel::new(vec![0.1]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(5);
    loader.yielded = 3;
    let mut scheduler = RecordingScheduler::named("primary");

    let report = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::new(2, 40),
        &opts(5, 0),
        &Host,
        None,
        &hidden_bars(),
    )
    .unwrap();

    assert_eq!(loader.resets, 1);
    assert_eq!(report.restarts, 0);
    assert_eq!(report.progress, TrainingProgress::new(2, 45));
}

#[test]
fn drives_schedule_per_step_and_once_per_epoch() {
    let mut model = ScriptedModel::new(vec![0.1]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(4);
    let mut scheduler = RecordingScheduler::named("primary");

    train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::new(0, 100),
        &opts(4, 0),
        &Host,
        None,
        &hidden_bars(),
    )
    .unwrap();

    assert_eq!(scheduler.batch_steps, vec![100, 101, 102, 103]);
    assert_eq!(scheduler.epoch_steps, 1);
}

#[test]
fn empty_loader_is_reported() {
    let mut model = ScriptedModel::new(vec![0.1]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(0);
    let mut scheduler = RecordingScheduler::named("primary");

    let err = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::default(),
        &opts(3, 0),
        &Host,
        None,
        &hidden_bars(),
    )
    .unwrap_err();

    assert!(matches!(err, TrainErr::EmptyLoader));
}

#[test]
fn clips_gradient_norm_before_the_step() {
    // |(6, 8)| = 10.
    let mut model = ScriptedModel::new(vec![6., 8.]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(1);
    let mut scheduler = RecordingScheduler::named("primary");

    let mut opts = opts(1, 0);
    opts.grad_norm_clip = 1.;

    let report = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::default(),
        &opts,
        &Host,
        None,
        &hidden_bars(),
    )
    .unwrap();

    assert!((report.last_grad_norm - 10.).abs() < 1e-5);
    assert!((grad_norm(&model.params) - 1.).abs() < 1e-4);

    // One SGD step from zero moves w by -lr * clipped grad.
    let w = &model.params[0].value;
    assert!((w[[0]] + 0.01 * 0.6).abs() < 1e-5);
    assert!((w[[1]] + 0.01 * 0.8).abs() < 1e-5);
}

#[test]
fn primary_rank_reports_scalars_and_first_batch_grids() {
    let mut model = PairRegressor::new(16);
    let mut optimizer = GradientDescentWithMomentum::new(model.parameters(), 0.01, 0.9, 0.);
    let mut loader = image_loader(12, 4);
    let mut scheduler = RecordingScheduler::named("primary");
    let mut sink = MemorySink::default();

    let report = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::default(),
        &opts(3, 0),
        &Host,
        Some(&mut sink as &mut dyn MetricSink),
        &hidden_bars(),
    )
    .unwrap();

    assert_eq!(sink.values("train_loss").len(), 3);
    assert_eq!(sink.values("learning_rate"), vec![0.01f32 as f64; 3]);
    assert_eq!(sink.values("grad_norm").len(), 3);
    for name in LossComponents::NAMES {
        assert_eq!(sink.values(name).len(), 3, "{name}");
    }
    assert_eq!(*sink.values("train_loss").last().unwrap(), report.last_loss as f64);

    let steps: Vec<u64> = sink
        .scalars
        .iter()
        .filter(|(n, ..)| n == "train_loss")
        .map(|s| s.2)
        .collect();
    assert_eq!(steps, vec![1, 2, 3]);

    // 4 images of 4x4 in one row: (1, 6 + 2, 4 * 6 + 2).
    assert_eq!(
        sink.images,
        vec![
            ("original_images".to_string(), vec![1, 8, 26], 0),
            ("homography".to_string(), vec![1, 8, 26], 0),
        ]
    );
}

#[test]
fn other_ranks_train_without_reporting() {
    let mut model = ScriptedModel::new(vec![0.5, 0.5]);
    let mut optimizer = sgd(&model);
    let mut loader = CountingLoader::new(3);
    let mut scheduler = RecordingScheduler::named("primary");
    let mut sink = MemorySink::default();

    let report = train_one_epoch(
        &mut model,
        &mut optimizer,
        &mut loader,
        &mut scheduler,
        TrainingProgress::default(),
        &opts(3, 1),
        &Host,
        Some(&mut sink as &mut dyn MetricSink),
        &hidden_bars(),
    )
    .unwrap();

    assert_eq!(report.progress.accumulated_iter, 3);
    assert!(sink.scalars.is_empty());
    assert!(sink.images.is_empty());
    assert!(model.params[0].value.iter().all(|&w| w < 0.));
}
