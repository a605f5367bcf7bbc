mod common;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::tensor::Tensor;
use collective::{Collective, DistributedContext, LocalGroup};
use models::{RecurrentPredictor, SequencePlannerConfig};
use sequence_dataset::SequenceSource;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use training::{run_worker, MetricsRecord, TrainConfig, TrainData};

type B = Autodiff<NdArray<f32>>;

fn config(out_dir: &Path, epochs: usize) -> TrainConfig {
    let mut cfg = TrainConfig {
        dataset: common::dataset_config(),
        model: SequencePlannerConfig {
            num_modes: 2,
            num_pts: 2,
            hidden_size: 8,
            num_layers: 1,
            encoder_channels: vec![4],
            feature_dim: 8,
        },
        epochs,
        batch_size: 2,
        num_workers: 1,
        val_every: 1,
        out_dir: out_dir.to_path_buf(),
        log_every: 0,
        seed: 7,
        ..Default::default()
    };
    cfg.optim.lr = 1e-3;
    cfg.bptt.truncation_length = 2;
    cfg
}

fn data(train: usize, val: usize) -> TrainData {
    TrainData {
        train: Arc::new(common::source(train)),
        val: Some(Arc::new(common::source(val)) as Arc<dyn SequenceSource>),
    }
}

fn read_records(path: &Path) -> Vec<MetricsRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn solo_run_trains_validates_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 2);
    let mut group = DistributedContext::solo();
    let device = Default::default();

    let (_, summary) = run_worker::<B>(&cfg, &data(4, 2), &mut group, &device).unwrap();

    // 2 batches per epoch, windows of 3 steps cut every 2 -> 2 boundaries each.
    assert_eq!(summary.epochs, 2);
    assert_eq!(summary.boundaries, 8);
    assert_eq!(summary.skipped_boundaries, 0);
    let report = summary.validation.unwrap();
    assert_eq!(report.epoch, 1);
    assert!(report.steps > 0.0);
    assert!(report.ade.is_finite() && report.min_ade <= report.ade + 1e-9);

    assert!(dir.path().join("planner_epoch_0000.bin").exists());
    assert!(dir.path().join("planner_epoch_0001.bin").exists());
    assert!(dir.path().join("planner_epoch_0001.json").exists());

    let records = read_records(&dir.path().join("metrics.jsonl"));
    let steps = records
        .iter()
        .filter(|r| matches!(r, MetricsRecord::Step(_)))
        .count();
    let validations = records
        .iter()
        .filter(|r| matches!(r, MetricsRecord::Validation(_)))
        .count();
    assert_eq!(steps, 8);
    assert_eq!(validations, 2);
}

#[test]
fn resume_continues_from_the_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let first = config(dir.path(), 1);
    run_worker::<B>(&first, &data(4, 2), &mut DistributedContext::solo(), &device).unwrap();

    let mut second = config(dir.path(), 3);
    second.resume = Some(dir.path().to_path_buf());
    second.val_every = 0;
    let (_, summary) =
        run_worker::<B>(&second, &data(4, 2), &mut DistributedContext::solo(), &device).unwrap();

    assert_eq!(summary.epochs, 2);
    assert_eq!(summary.boundaries, 12);
    assert!(summary.validation.is_none());
    assert!(dir.path().join("planner_epoch_0002.bin").exists());
}

#[test]
fn replicas_stay_identical_across_ranks() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().to_path_buf();
    let handles: Vec<_> = LocalGroup::new_group(2, Duration::from_secs(30))
        .into_iter()
        .map(|group| {
            let out = out.clone();
            thread::spawn(move || {
                let cfg = config(&out, 2);
                let mut group = DistributedContext::from_group(group);
                let device = Default::default();
                let rank = group.rank();
                let (model, summary) =
                    run_worker::<B>(&cfg, &data(4, 2), &mut group, &device).unwrap();

                let model = model.valid();
                let frames = Tensor::<NdArray<f32>, 4>::ones([1, 6, 2, 4], &device) * 0.25;
                let hidden = model.init_hidden(1, &device);
                let logits: Vec<f32> = model
                    .predict(frames, hidden)
                    .logits
                    .into_data()
                    .to_vec::<f32>()
                    .unwrap();
                (rank, summary, logits)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // 4 sequences over 2 ranks: one batch of 2 per rank and epoch.
    for (_, summary, _) in &results {
        assert_eq!(summary.epochs, 2);
        assert_eq!(summary.boundaries, 4);
    }
    assert_eq!(results[0].2, results[1].2);
    let ranks: Vec<usize> = results.iter().map(|r| r.0).collect();
    assert_eq!(ranks, vec![0, 1]);
    assert!(out.join("planner_epoch_0001.bin").exists());
}
