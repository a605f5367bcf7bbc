use approx::assert_abs_diff_eq;
use burn::backend::NdArray;
use burn::tensor::{backend::Backend, Tensor};
use models::{RecurrentPredictor, SequencePlanner, SequencePlannerConfig};
use std::fs;
use training::{load_weights, CheckpointMeta, CheckpointStore, LrSchedule, StepDecay};

type B = NdArray<f32>;

fn tiny_config() -> SequencePlannerConfig {
    SequencePlannerConfig {
        num_modes: 2,
        num_pts: 2,
        hidden_size: 8,
        num_layers: 1,
        encoder_channels: vec![4],
        feature_dim: 8,
    }
}

fn logits(model: &SequencePlanner<B>) -> Vec<f32> {
    let device = Default::default();
    let frames = Tensor::<B, 4>::ones([1, 6, 4, 8], &device) * 0.5;
    let hidden = model.init_hidden(1, &device);
    model
        .predict(frames, hidden)
        .logits
        .into_data()
        .to_vec::<f32>()
        .unwrap()
}

#[test]
fn save_then_load_restores_weights_and_meta() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("ckpt"));
    let device = Default::default();

    B::seed(1);
    let trained = SequencePlanner::<B>::new(tiny_config(), &device);
    let meta = CheckpointMeta {
        epoch: 3,
        boundary: 42,
        lr_steps: 40,
        world_size: 2,
    };
    let stem = store.save::<B, _>(&trained, &meta).unwrap();
    assert!(stem.with_extension("bin").exists());

    B::seed(2);
    let fresh = SequencePlanner::<B>::new(tiny_config(), &device);
    assert_ne!(logits(&fresh), logits(&trained));

    assert_eq!(store.latest(), Some(3));
    assert_eq!(store.load_meta(3).unwrap(), meta);
    let restored = store.load(fresh, 3, &device).unwrap();
    assert_eq!(logits(&restored), logits(&trained));

    let again = load_weights(
        SequencePlanner::<B>::new(tiny_config(), &device),
        &stem.with_extension("bin"),
        &device,
    )
    .unwrap();
    assert_eq!(logits(&again), logits(&trained));
}

#[test]
fn latest_ignores_checkpoints_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let device = Default::default();
    let model = SequencePlanner::<B>::new(tiny_config(), &device);
    assert_eq!(store.latest(), None);

    for epoch in [0, 1, 5] {
        let meta = CheckpointMeta {
            epoch,
            ..Default::default()
        };
        store.save::<B, _>(&model, &meta).unwrap();
    }
    assert_eq!(store.latest(), Some(5));
    fs::remove_file(store.stem(5).with_extension("json")).unwrap();
    assert_eq!(store.latest(), Some(1));
}

#[test]
fn missing_checkpoint_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let device = Default::default();
    let model = SequencePlanner::<B>::new(tiny_config(), &device);
    assert!(store.load(model, 7, &device).is_err());
    assert!(store.load_meta(7).is_err());
}

#[test]
fn step_decay_multiplies_every_step_size() {
    let mut schedule = StepDecay::new(1.0, 2, 0.5);
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(schedule.current());
        schedule.step();
    }
    assert_eq!(seen, vec![1.0, 1.0, 0.5, 0.5, 0.25]);
    assert_eq!(schedule.steps(), 5);

    let mut resumed = StepDecay::new(1e-4, 20, 0.9);
    resumed.fast_forward(45);
    assert_eq!(resumed.steps(), 45);
    assert_abs_diff_eq!(resumed.current(), 1e-4 * 0.81, epsilon = 1e-12);
}
