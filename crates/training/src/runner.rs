//! Training entry points: the launcher, one worker per rank, and the epoch loop.

use crate::bptt::BpttTrainer;
use crate::checkpoint::{load_weights, CheckpointMeta, CheckpointStore};
use crate::config::{EvalArgs, OptimizerKind, TrainArgs, TrainConfig};
use crate::context::TrainingContext;
use crate::lockstep::{next_in_lockstep, Lockstep};
use crate::metrics::{JsonlSink, MetricsRecord, MetricsSink, NullSink, ValidationReport};
use crate::schedule::{LrSchedule, StepDecay};
use crate::util::validate_backend_choice;
use crate::validate::evaluate;
use crate::TrainBackend;
use anyhow::Context;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use collective::{
    launch, sync_module_state, Collective, DistConfig, DistributedContext, LaunchConfig,
    SoloGroup, StateSync,
};
use models::{SequencePlanner, TrajectoryLoss};
use sequence_dataset::{
    DirSequenceSource, LoaderConfig, SequenceLoader, SequenceSource, ShardPlan,
};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub type TrainAutodiff = Autodiff<TrainBackend>;

/// Train and validation sequences for one run.
#[derive(Clone)]
pub struct TrainData {
    pub train: Arc<dyn SequenceSource>,
    pub val: Option<Arc<dyn SequenceSource>>,
}

impl TrainData {
    pub fn from_config(cfg: &TrainConfig) -> anyhow::Result<Self> {
        let train = DirSequenceSource::from_split_file(&cfg.data.prefix, &cfg.data.train_split)
            .with_context(|| {
                format!("failed to load train split {}", cfg.data.train_split.display())
            })?;
        let val = match &cfg.data.val_split {
            Some(split) => Some(
                DirSequenceSource::from_split_file(&cfg.data.prefix, split)
                    .with_context(|| format!("failed to load val split {}", split.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            train: Arc::new(train),
            val: val.map(|v| Arc::new(v) as Arc<dyn SequenceSource>),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Epochs trained by this invocation (excludes resumed ones).
    pub epochs: usize,
    /// Applied optimizer updates, including resumed ones.
    pub boundaries: usize,
    pub skipped_boundaries: usize,
    pub skipped_batches: usize,
    pub validation: Option<ValidationReport>,
    pub checkpoint: Option<PathBuf>,
}

/// Entry point of the `train` binary.
///
/// With `WORLD_SIZE` in the environment this process is one worker of a group. Otherwise
/// `world_size > 1` re-launches this binary once per rank, and a world of one trains
/// in-process.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let cfg = args.resolve()?;

    if let Some(dist) = DistConfig::from_env(cfg.collective_timeout())? {
        let span = tracing::info_span!("worker", rank = dist.rank);
        let _enter = span.enter();
        let data = TrainData::from_config(&cfg)?;
        let mut group = DistributedContext::connect(&dist)
            .with_context(|| format!("rank {} failed to join the group", dist.rank))?;
        let device = <TrainAutodiff as Backend>::Device::default();
        let (_, summary) = run_worker::<TrainAutodiff>(&cfg, &data, &mut group, &device)?;
        log_summary(&summary);
        return Ok(());
    }

    if cfg.world_size > 1 {
        let program = std::env::current_exe().context("cannot locate the train binary")?;
        let forwarded: Vec<OsString> = std::env::args_os().skip(1).collect();
        let launch_cfg = LaunchConfig {
            world_size: cfg.world_size,
            ..Default::default()
        };
        launch(&program, &forwarded, &launch_cfg)?;
        tracing::info!(world_size = cfg.world_size, "all workers finished");
        return Ok(());
    }

    let span = tracing::info_span!("worker", rank = 0);
    let _enter = span.enter();
    let data = TrainData::from_config(&cfg)?;
    let mut group = DistributedContext::solo();
    let device = <TrainAutodiff as Backend>::Device::default();
    let (_, summary) = run_worker::<TrainAutodiff>(&cfg, &data, &mut group, &device)?;
    log_summary(&summary);
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        epochs = summary.epochs,
        boundaries = summary.boundaries,
        skipped_boundaries = summary.skipped_boundaries,
        skipped_batches = summary.skipped_batches,
        checkpoint = ?summary.checkpoint,
        "training complete"
    );
}

/// Where a resumed run picks up.
#[derive(Debug, Clone, Copy, Default)]
struct ResumeState {
    next_epoch: usize,
    boundary: usize,
    lr_steps: usize,
}

impl ResumeState {
    /// Each counter travels as two 16-bit halves so it stays exact in an f32 broadcast.
    fn to_array(self) -> [f32; 6] {
        let mut out = [0.0; 6];
        for (pair, v) in out
            .chunks_exact_mut(2)
            .zip([self.next_epoch, self.boundary, self.lr_steps])
        {
            let v = v as u64;
            pair[0] = (v >> 16) as f32;
            pair[1] = (v & 0xffff) as f32;
        }
        out
    }

    fn from_array(v: [f32; 6]) -> Self {
        let join = |i: usize| (((v[i] as u64) << 16) | v[i + 1] as u64) as usize;
        Self {
            next_epoch: join(0),
            boundary: join(2),
            lr_steps: join(4),
        }
    }
}

/// A directory resumes from its latest epoch; a file is loaded as bare weights.
fn resume<B: Backend>(
    model: SequencePlanner<B>,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<(SequencePlanner<B>, ResumeState)> {
    if path.is_dir() {
        let store = CheckpointStore::new(path);
        let Some(epoch) = store.latest() else {
            tracing::warn!(dir = %path.display(), "no checkpoint to resume from; starting fresh");
            return Ok((model, ResumeState::default()));
        };
        let meta = store.load_meta(epoch)?;
        let model = store.load(model, epoch, device)?;
        tracing::info!(epoch, boundary = meta.boundary, "resumed from checkpoint");
        return Ok((
            model,
            ResumeState {
                next_epoch: meta.epoch + 1,
                boundary: meta.boundary,
                lr_steps: meta.lr_steps,
            },
        ));
    }
    let model = load_weights(model, path, device)?;
    tracing::info!(path = %path.display(), "loaded initial weights");
    Ok((model, ResumeState::default()))
}

/// Train on this rank. Every rank of `group` must call this with the same config.
pub fn run_worker<B: AutodiffBackend>(
    cfg: &TrainConfig,
    data: &TrainData,
    group: &mut dyn Collective,
    device: &B::Device,
) -> anyhow::Result<(SequencePlanner<B>, RunSummary)> {
    cfg.validate()?;
    let rank = group.rank();
    let world_size = group.world_size();
    B::seed(cfg.seed);

    let mut model = SequencePlanner::<B>::new(cfg.model.clone(), device);
    let mut state = ResumeState::default();
    if let (Some(path), true) = (&cfg.resume, group.is_root()) {
        (model, state) = resume(model, path, device)?;
    }
    model = sync_module_state::<B, _>(model, group, StateSync::Broadcast { root: 0 })?;
    let mut shared = state.to_array();
    group.broadcast(&mut shared, 0)?;
    let state = ResumeState::from_array(shared);

    let loader_cfg = LoaderConfig {
        batch_size: cfg.batch_size,
        num_workers: cfg.num_workers,
        prefetch: cfg.prefetch,
        log_every: cfg.log_every,
    };
    let train_loader = SequenceLoader::new(
        Arc::clone(&data.train),
        cfg.dataset.clone(),
        loader_cfg,
        ShardPlan::new(rank, world_size).with_seed(cfg.seed),
    )?;
    let val_loader = data
        .val
        .as_ref()
        .map(|source| {
            SequenceLoader::new(
                Arc::clone(source),
                cfg.dataset.clone(),
                loader_cfg,
                ShardPlan::new(rank, world_size).with_shuffle(false),
            )
        })
        .transpose()?;
    tracing::info!(
        world_size,
        train_sequences = train_loader.dataset_len(),
        batches_per_epoch = train_loader.batches_per_epoch(),
        val_sequences = val_loader.as_ref().map(|l| l.dataset_len()).unwrap_or(0),
        start_epoch = state.next_epoch,
        "starting training"
    );
    if train_loader.batches_per_epoch() == 0 {
        tracing::warn!("this rank owns no training sequences; epochs will be empty");
    }

    let mut schedule = StepDecay::new(cfg.optim.lr, cfg.optim.lr_step, cfg.optim.lr_gamma);
    schedule.fast_forward(state.lr_steps);
    let loop_state = EpochLoop {
        cfg,
        train_loader: &train_loader,
        val_loader: val_loader.as_ref(),
        store: CheckpointStore::new(&cfg.out_dir),
        start: state,
    };

    let weight_decay = Some(WeightDecayConfig::new(cfg.optim.weight_decay as f32));
    match cfg.optim.kind {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new().with_momentum(cfg.optim.momentum)))
                .with_weight_decay(weight_decay)
                .init::<B, SequencePlanner<B>>();
            loop_state.run(model, optim, schedule, group, device)
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_weight_decay(weight_decay)
                .init::<B, SequencePlanner<B>>();
            loop_state.run(model, optim, schedule, group, device)
        }
    }
}

struct EpochLoop<'a> {
    cfg: &'a TrainConfig,
    train_loader: &'a SequenceLoader,
    val_loader: Option<&'a SequenceLoader>,
    store: CheckpointStore,
    start: ResumeState,
}

impl EpochLoop<'_> {
    fn run<B, O>(
        &self,
        mut model: SequencePlanner<B>,
        optim: O,
        schedule: StepDecay,
        group: &mut dyn Collective,
        device: &B::Device,
    ) -> anyhow::Result<(SequencePlanner<B>, RunSummary)>
    where
        B: AutodiffBackend,
        O: Optimizer<SequencePlanner<B>, B>,
    {
        let cfg = self.cfg;
        let rank = group.rank();
        let loss = TrajectoryLoss::default();
        let mut trainer = BpttTrainer::new(optim, loss, Box::new(schedule), cfg.bptt);
        let mut ctx = TrainingContext::new(rank, group.world_size(), cfg.seed);
        ctx.boundary = self.start.boundary;

        let mut sink: Box<dyn MetricsSink> = if group.is_root() {
            let path = cfg.out_dir.join("metrics.jsonl");
            Box::new(
                JsonlSink::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        } else {
            Box::new(NullSink)
        };
        let mut summary = RunSummary::default();

        for epoch in self.start.next_epoch..cfg.epochs {
            ctx.start_epoch(epoch);
            let started = Instant::now();
            let skipped_before = ctx.skipped;
            let mut iter = self.train_loader.epoch(epoch);
            loop {
                let batch = match next_in_lockstep(&mut iter, group, cfg.dataset.strict_assets)? {
                    Lockstep::Batch(batch) => batch,
                    Lockstep::Skip => {
                        summary.skipped_batches += 1;
                        continue;
                    }
                    Lockstep::Done => break,
                };
                let (frames, labels) = batch.to_tensors::<B>(device);
                let (next, report) =
                    trainer.train_window(model, frames, labels, &mut ctx, group, sink.as_mut())?;
                model = next;
                if report.abandoned {
                    tracing::warn!(epoch, window = ctx.window, "window abandoned after non-finite loss");
                }
            }
            drop(iter);
            sink.flush()?;
            tracing::info!(
                epoch,
                windows = ctx.window,
                boundary = ctx.boundary,
                skipped = ctx.skipped - skipped_before,
                lr = trainer.schedule().current(),
                secs = started.elapsed().as_secs_f32(),
                "epoch complete"
            );

            model = sync_module_state::<B, _>(model, group, StateSync::MeanBuffers)?;

            let due = cfg.val_every > 0 && (epoch + 1) % cfg.val_every == 0;
            if let (true, Some(loader)) = (due, self.val_loader) {
                let report =
                    evaluate(&model.valid(), &loss, cfg.bptt.mtp_alpha, loader, epoch, group, device)?;
                sink.record(&MetricsRecord::Validation(report.clone()))?;
                sink.flush()?;
                summary.validation = Some(report);
            }

            if group.is_root() {
                let meta = CheckpointMeta {
                    epoch,
                    boundary: ctx.boundary,
                    lr_steps: trainer.schedule().steps(),
                    world_size: ctx.world_size,
                };
                summary.checkpoint = Some(self.store.save::<B, _>(&model, &meta)?);
            }
            group.barrier()?;
            summary.epochs += 1;
        }

        summary.boundaries = ctx.boundary;
        summary.skipped_boundaries = ctx.skipped;
        Ok((model, summary))
    }
}

/// Entry point of the `eval` binary: score a checkpoint on one split.
pub fn run_eval(args: EvalArgs) -> anyhow::Result<ValidationReport> {
    validate_backend_choice(args.backend)?;
    let mut cfg = match &args.config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };
    if let Some(prefix) = &args.data_prefix {
        cfg.data.prefix = prefix.clone();
    }
    let split = args
        .split
        .clone()
        .or_else(|| cfg.data.val_split.clone())
        .ok_or_else(|| anyhow::anyhow!("no split to evaluate; pass --split"))?;
    let source = DirSequenceSource::from_split_file(&cfg.data.prefix, &split)
        .with_context(|| format!("failed to load split {}", split.display()))?;

    let device = <TrainBackend as Backend>::Device::default();
    let model = SequencePlanner::<TrainBackend>::new(cfg.model.clone(), &device);
    let model = load_weights(model, &args.checkpoint, &device)?;
    let loader = SequenceLoader::new(
        Arc::new(source),
        cfg.dataset.clone(),
        LoaderConfig {
            batch_size: args.batch_size.unwrap_or(cfg.batch_size),
            num_workers: args.num_workers.unwrap_or(cfg.num_workers),
            prefetch: cfg.prefetch,
            log_every: cfg.log_every,
        },
        ShardPlan::full(),
    )?;

    let mut group = SoloGroup;
    let report = evaluate(
        &model,
        &TrajectoryLoss::default(),
        cfg.bptt.mtp_alpha,
        &loader,
        0,
        &mut group,
        &device,
    )?;
    if let Some(out) = &args.report_out {
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(out, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }
    Ok(report)
}
