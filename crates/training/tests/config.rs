use clap::Parser;
use std::fs;
use std::path::PathBuf;
use training::{NonFinitePolicy, OptimizerKind, TrainArgs, TrainConfig};

#[test]
fn defaults_match_the_reference_recipe() {
    let cfg = TrainConfig::default();
    assert_eq!(cfg.batch_size, 8);
    assert_eq!(cfg.optim.kind, OptimizerKind::Sgd);
    assert_eq!(cfg.optim.lr, 1e-4);
    assert_eq!(cfg.optim.momentum, 0.9);
    assert_eq!(cfg.optim.weight_decay, 0.01);
    assert_eq!(cfg.optim.lr_step, 20);
    assert_eq!(cfg.optim.lr_gamma, 0.9);
    assert_eq!(cfg.bptt.truncation_length, 40);
    assert_eq!(cfg.bptt.mtp_alpha, 1.0);
    assert_eq!(cfg.bptt.non_finite, NonFinitePolicy::SkipStep);
    assert_eq!(cfg.dataset.fix_seq_length, 40);
    assert_eq!(cfg.model.num_modes, 3);
    assert_eq!(cfg.model.num_pts, 20);
    assert_eq!(cfg.val_every, 10);
    cfg.validate().unwrap();
}

#[test]
fn flags_override_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("train.toml");
    fs::write(
        &path,
        r#"
epochs = 7
val_every = 0

[optim]
kind = "adam"
lr = 0.001

[bptt]
truncation_length = 10
non_finite = "skip-window"

[dataset]
fix_seq_length = 20
"#,
    )
    .unwrap();

    let args = TrainArgs::try_parse_from([
        "train",
        "--config",
        path.to_str().unwrap(),
        "--lr",
        "0.5",
        "--num-pts",
        "5",
        "--data-prefix",
        "/data/seqs",
        "--strict-assets",
    ])
    .unwrap();
    let cfg = args.resolve().unwrap();

    assert_eq!(cfg.epochs, 7);
    assert_eq!(cfg.val_every, 0);
    assert_eq!(cfg.optim.kind, OptimizerKind::Adam);
    assert_eq!(cfg.optim.lr, 0.5);
    assert_eq!(cfg.optim.momentum, 0.9);
    assert_eq!(cfg.bptt.truncation_length, 10);
    assert_eq!(cfg.bptt.non_finite, NonFinitePolicy::SkipWindow);
    assert_eq!(cfg.dataset.fix_seq_length, 20);
    assert_eq!(cfg.dataset.num_pts, 5);
    assert_eq!(cfg.model.num_pts, 5);
    assert_eq!(cfg.data.prefix, PathBuf::from("/data/seqs"));
    assert!(cfg.dataset.strict_assets);
    assert_eq!(cfg.batch_size, 8);
}

#[test]
fn inconsistent_shapes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[model]\nnum_pts = 5\n").unwrap();
    let args = TrainArgs::try_parse_from(["train", "--config", path.to_str().unwrap()]).unwrap();
    assert!(args.resolve().is_err());

    let args = TrainArgs::try_parse_from(["train", "--truncation-length", "0"]).unwrap();
    assert!(args.resolve().is_err());
}

#[test]
fn unreadable_config_is_an_error() {
    let args = TrainArgs::try_parse_from(["train", "--config", "/nonexistent/train.toml"]).unwrap();
    assert!(args.resolve().is_err());
}

#[test]
fn run_seed_reaches_the_window_sampler() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seeded.toml");
    fs::write(&path, "seed = 11\n").unwrap();
    let cfg = TrainConfig::load(&path).unwrap();
    assert_eq!(cfg.seed, 11);
    assert_eq!(cfg.dataset.seed, 11);

    fs::write(&path, "seed = 11\n\n[dataset]\nseed = 5\n").unwrap();
    let cfg = TrainConfig::load(&path).unwrap();
    assert_eq!(cfg.seed, 11);
    assert_eq!(cfg.dataset.seed, 5);
}
