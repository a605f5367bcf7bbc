#![recursion_limit = "256"]
//! Truncated-BPTT training for the recurrent trajectory planner.
//!
//! - `bptt`: per-window stepping, boundary flushes and hidden-state detachment.
//! - `lockstep`: keeps ranks on the same batch schedule.
//! - `runner`: launcher, per-rank worker, epoch loop, validation and checkpoints.
//! - `config`: TOML config plus CLI overrides.

pub mod bptt;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod lockstep;
pub mod metrics;
pub mod runner;
pub mod schedule;
pub mod util;
pub mod validate;

pub use bptt::{BpttConfig, BpttTrainer, NonFinitePolicy, WindowReport};
pub use checkpoint::{load_weights, CheckpointMeta, CheckpointStore};
pub use config::{EvalArgs, OptimizerKind, TrainArgs, TrainConfig};
pub use context::TrainingContext;
pub use error::{TrainError, TrainResult};
pub use metrics::{
    JsonlSink, MemorySink, MetricsRecord, MetricsSink, NullSink, StepMetrics, ValidationReport,
};
pub use runner::{run_eval, run_train, run_worker, RunSummary, TrainAutodiff, TrainData};
pub use schedule::{ConstantLr, LrSchedule, StepDecay};
pub use util::{init_tracing, validate_backend_choice, BackendKind};
pub use validate::evaluate;

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
