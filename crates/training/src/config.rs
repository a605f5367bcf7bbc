//! Run configuration: TOML file defaults overridden by command-line flags.

use crate::bptt::{BpttConfig, NonFinitePolicy};
use crate::util::BackendKind;
use clap::{Parser, ValueEnum};
use models::SequencePlannerConfig;
use sequence_dataset::DatasetConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    Adam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    /// Directory the split entries are relative to.
    pub prefix: PathBuf,
    pub train_split: PathBuf,
    pub val_split: Option<PathBuf>,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("data/comma2k19"),
            train_split: PathBuf::from("data/splits/train.txt"),
            val_split: Some(PathBuf::from("data/splits/val.txt")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Applied boundaries between learning-rate decays.
    pub lr_step: usize,
    pub lr_gamma: f64,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            lr: 1e-4,
            momentum: 0.9,
            weight_decay: 0.01,
            lr_step: 20,
            lr_gamma: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataPaths,
    pub dataset: DatasetConfig,
    pub model: SequencePlannerConfig,
    pub optim: OptimConfig,
    pub bptt: BpttConfig,
    pub epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub prefetch: usize,
    /// Validate every N epochs (0 disables).
    pub val_every: usize,
    pub out_dir: PathBuf,
    /// Checkpoint to resume from: a directory (latest epoch) or a weights file.
    pub resume: Option<PathBuf>,
    pub seed: u64,
    /// Processes to launch on this host when not already running as a worker.
    pub world_size: usize,
    pub collective_timeout_secs: u64,
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: DataPaths::default(),
            dataset: DatasetConfig::default(),
            model: SequencePlannerConfig::default(),
            optim: OptimConfig::default(),
            bptt: BpttConfig::default(),
            epochs: 100,
            batch_size: 8,
            num_workers: 8,
            prefetch: 2,
            val_every: 10,
            out_dir: PathBuf::from("runs/planner"),
            resume: None,
            seed: 0,
            world_size: 1,
            collective_timeout_secs: 300,
            log_every: 50,
        }
    }
}

impl TrainConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let mut cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        // An unset `[dataset] seed` follows the run seed.
        if cfg.dataset.seed == 0 {
            cfg.dataset.seed = cfg.seed;
        }
        Ok(cfg)
    }

    pub fn collective_timeout(&self) -> Duration {
        Duration::from_secs(self.collective_timeout_secs.max(1))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        if self.bptt.truncation_length == 0 {
            anyhow::bail!("truncation_length must be positive");
        }
        if self.dataset.fix_seq_length == 0 {
            anyhow::bail!("fix_seq_length must be positive");
        }
        if self.dataset.num_pts != self.model.num_pts {
            anyhow::bail!(
                "dataset num_pts ({}) and model num_pts ({}) differ",
                self.dataset.num_pts,
                self.model.num_pts
            );
        }
        if self.world_size == 0 {
            anyhow::bail!("world_size must be positive");
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "train",
    about = "Train the recurrent trajectory planner with truncated BPTT (optionally multi-process)"
)]
pub struct TrainArgs {
    /// TOML config; flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Dataset root the split entries are relative to.
    #[arg(long)]
    pub data_prefix: Option<PathBuf>,
    #[arg(long)]
    pub train_split: Option<PathBuf>,
    #[arg(long)]
    pub val_split: Option<PathBuf>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,
    /// Steps per optimizer update.
    #[arg(long)]
    pub truncation_length: Option<usize>,
    /// Steps per training window.
    #[arg(long)]
    pub fix_seq_length: Option<usize>,
    /// Future points per trajectory.
    #[arg(long)]
    pub num_pts: Option<usize>,
    /// Candidate trajectories per step.
    #[arg(long)]
    pub modes: Option<usize>,
    #[arg(long)]
    pub mtp_alpha: Option<f32>,
    /// Validate every N epochs (0 disables).
    #[arg(long)]
    pub val_every: Option<usize>,
    #[arg(long, value_enum)]
    pub non_finite: Option<NonFinitePolicy>,
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
    #[arg(long)]
    pub resume: Option<PathBuf>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Loader threads per process.
    #[arg(long)]
    pub num_workers: Option<usize>,
    /// Worker processes to launch on this host.
    #[arg(long)]
    pub world_size: Option<usize>,
    /// Fail on the first unreadable sample instead of replacing it.
    #[arg(long)]
    pub strict_assets: bool,
    /// Seconds a collective may wait for a peer.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl TrainArgs {
    pub fn resolve(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = match &self.config {
            Some(path) => TrainConfig::load(path)?,
            None => TrainConfig::default(),
        };
        if let Some(v) = &self.data_prefix {
            cfg.data.prefix = v.clone();
        }
        if let Some(v) = &self.train_split {
            cfg.data.train_split = v.clone();
        }
        if let Some(v) = &self.val_split {
            cfg.data.val_split = Some(v.clone());
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.lr {
            cfg.optim.lr = v;
        }
        if let Some(v) = self.optimizer {
            cfg.optim.kind = v;
        }
        if let Some(v) = self.truncation_length {
            cfg.bptt.truncation_length = v;
        }
        if let Some(v) = self.fix_seq_length {
            cfg.dataset.fix_seq_length = v;
        }
        if let Some(v) = self.num_pts {
            cfg.dataset.num_pts = v;
            cfg.model.num_pts = v;
        }
        if let Some(v) = self.modes {
            cfg.model.num_modes = v;
        }
        if let Some(v) = self.mtp_alpha {
            cfg.bptt.mtp_alpha = v;
        }
        if let Some(v) = self.val_every {
            cfg.val_every = v;
        }
        if let Some(v) = self.non_finite {
            cfg.bptt.non_finite = v;
        }
        if let Some(v) = &self.out_dir {
            cfg.out_dir = v.clone();
        }
        if let Some(v) = &self.resume {
            cfg.resume = Some(v.clone());
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
            cfg.dataset.seed = v;
        }
        if let Some(v) = self.num_workers {
            cfg.num_workers = v;
        }
        if let Some(v) = self.world_size {
            cfg.world_size = v;
        }
        if self.strict_assets {
            cfg.dataset.strict_assets = true;
        }
        if let Some(v) = self.timeout_secs {
            cfg.collective_timeout_secs = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "eval",
    about = "Evaluate a planner checkpoint on a split (ADE/FDE, best-of-M ADE)"
)]
pub struct EvalArgs {
    /// Weights file (`.bin`) written by `train`.
    #[arg(long)]
    pub checkpoint: PathBuf,
    /// TOML config used for training (model/dataset shape).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long)]
    pub data_prefix: Option<PathBuf>,
    /// Split to evaluate (defaults to the config's validation split).
    #[arg(long)]
    pub split: Option<PathBuf>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    /// Write the report as JSON here.
    #[arg(long)]
    pub report_out: Option<PathBuf>,
}
