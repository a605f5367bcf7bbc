//! Truncated backpropagation through time over one training window.
//!
//! The window is stepped frame pair by frame pair with the hidden state carried
//! forward. Scaled step losses accumulate until a truncation boundary (every
//! `truncation_length` steps and at the last step), where the segment is
//! backpropagated, gradients are averaged across ranks, the optimizer and schedule
//! step, and the hidden state is detached so the next segment's gradient stops there.

use crate::context::TrainingContext;
use crate::error::{TrainError, TrainResult};
use crate::metrics::{MetricsRecord, MetricsSink, StepMetrics};
use crate::schedule::LrSchedule;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use clap::ValueEnum;
use collective::{all_reduce_gradients, Collective, ReduceOp};
use models::{RecurrentPredictor, StepLoss};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// What to do when any rank's segment loss is NaN or infinite.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonFinitePolicy {
    /// Skip this boundary's update and keep stepping the window.
    #[default]
    SkipStep,
    /// Skip the update and abandon the rest of the window.
    SkipWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpttConfig {
    /// Steps per optimizer update.
    pub truncation_length: usize,
    /// Weight of the regression term against classification.
    pub mtp_alpha: f32,
    pub non_finite: NonFinitePolicy,
}

impl Default for BpttConfig {
    fn default() -> Self {
        Self {
            truncation_length: 40,
            mtp_alpha: 1.0,
            non_finite: NonFinitePolicy::SkipStep,
        }
    }
}

impl BpttConfig {
    /// Boundaries a window of `steps` produces.
    pub fn boundaries(&self, steps: usize) -> usize {
        steps.div_ceil(self.truncation_length.max(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowReport {
    pub steps: usize,
    pub boundaries: usize,
    pub applied: usize,
    pub skipped: usize,
    pub abandoned: bool,
}

/// Host-side running sums for the current segment (for metrics only).
#[derive(Default)]
struct SegmentStats {
    steps: usize,
    cls: f32,
    reg: [f32; 3],
}

impl SegmentStats {
    fn add<B: AutodiffBackend>(&mut self, cls: &Tensor<B, 1>, reg: &Tensor<B, 1>) {
        self.steps += 1;
        let cls = scalars(cls.clone().detach());
        let reg = scalars(reg.clone().detach());
        self.cls += cls.first().copied().unwrap_or(f32::NAN);
        for (acc, v) in self.reg.iter_mut().zip(reg.iter().chain(std::iter::repeat(&f32::NAN))) {
            *acc += *v;
        }
    }
}

fn scalars<B: burn::tensor::backend::Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
}

pub struct BpttTrainer<B, M, O, L>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + RecurrentPredictor<B>,
    O: Optimizer<M, B>,
    L: StepLoss<B>,
{
    optim: O,
    loss: L,
    schedule: Box<dyn LrSchedule>,
    cfg: BpttConfig,
    _marker: PhantomData<(B, M)>,
}

impl<B, M, O, L> BpttTrainer<B, M, O, L>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + RecurrentPredictor<B>,
    O: Optimizer<M, B>,
    L: StepLoss<B>,
{
    pub fn new(optim: O, loss: L, schedule: Box<dyn LrSchedule>, cfg: BpttConfig) -> Self {
        Self {
            optim,
            loss,
            schedule,
            cfg,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &BpttConfig {
        &self.cfg
    }

    pub fn schedule(&self) -> &dyn LrSchedule {
        self.schedule.as_ref()
    }

    /// Train on one batch of windows.
    ///
    /// `frames: [batch, T, 6, H, W]`, `labels: [batch, T, num_pts, 3]`. Every rank must
    /// call this with the same `T` so boundaries line up.
    pub fn train_window(
        &mut self,
        mut model: M,
        frames: Tensor<B, 5>,
        labels: Tensor<B, 4>,
        ctx: &mut TrainingContext,
        group: &mut dyn Collective,
        sink: &mut dyn MetricsSink,
    ) -> TrainResult<(M, WindowReport)> {
        let [batch, steps, channels, height, width] = frames.dims();
        let [_, label_steps, points, _] = labels.dims();
        if label_steps != steps {
            return Err(TrainError::Config(format!(
                "window has {steps} frame steps but {label_steps} label steps"
            )));
        }
        let trunc = self.cfg.truncation_length.max(1);
        let device = frames.device();

        let mut report = WindowReport {
            steps,
            ..Default::default()
        };
        let mut hidden = model.init_hidden(batch, &device);
        let mut acc: Option<Tensor<B, 1>> = None;
        let mut stats = SegmentStats::default();

        for t in 0..steps {
            let x = frames
                .clone()
                .slice([0..batch, t..t + 1, 0..channels, 0..height, 0..width])
                .reshape([batch, channels, height, width]);
            let y = labels
                .clone()
                .slice([0..batch, t..t + 1, 0..points, 0..3])
                .reshape([batch, points, 3]);

            let pred = model.predict(x, hidden);
            hidden = pred.hidden;
            let out = self.loss.step_loss(pred.logits, pred.trajectories, y);
            stats.add(&out.cls, &out.reg);
            let scaled = out.combined(self.cfg.mtp_alpha) / trunc as f32;
            acc = Some(match acc.take() {
                Some(sum) => sum + scaled,
                None => scaled,
            });

            if (t + 1) % trunc != 0 && t + 1 != steps {
                continue;
            }

            report.boundaries += 1;
            let Some(segment) = acc.take() else {
                continue;
            };
            let (next, applied) =
                self.flush(model, segment, std::mem::take(&mut stats), ctx, group, sink)?;
            model = next;
            hidden = hidden.detach();
            if applied {
                report.applied += 1;
            } else {
                report.skipped += 1;
                if self.cfg.non_finite == NonFinitePolicy::SkipWindow {
                    report.abandoned = true;
                    break;
                }
            }
        }

        ctx.window += 1;
        Ok((model, report))
    }

    /// Backward + all-reduce + optimizer step for one segment. Returns whether the
    /// update was applied (false when some rank saw a non-finite loss).
    fn flush(
        &mut self,
        model: M,
        segment: Tensor<B, 1>,
        stats: SegmentStats,
        ctx: &mut TrainingContext,
        group: &mut dyn Collective,
        sink: &mut dyn MetricsSink,
    ) -> TrainResult<(M, bool)> {
        let value = scalars(segment.clone().detach())
            .first()
            .copied()
            .unwrap_or(f32::NAN);
        let mut finite = [if value.is_finite() { 1.0 } else { 0.0 }];
        group.all_reduce(&mut finite, ReduceOp::Min)?;
        let lr = self.schedule.current();

        let n = stats.steps.max(1) as f32;
        let mut metrics = StepMetrics {
            epoch: ctx.epoch,
            window: ctx.window,
            boundary: ctx.boundary,
            rank: ctx.rank,
            steps: stats.steps,
            cls: stats.cls / n,
            reg: stats.reg.iter().sum::<f32>() / (3.0 * n),
            reg_xyz: stats.reg.map(|v| v / n),
            loss: value,
            lr,
            skipped: false,
        };

        if finite[0] < 0.5 {
            let err = TrainError::NonFiniteLoss {
                rank: ctx.rank,
                epoch: ctx.epoch,
                boundary: ctx.boundary,
                value,
            };
            tracing::warn!(rank = ctx.rank, window = ctx.window, "{err}; skipping update");
            ctx.skipped += 1;
            metrics.skipped = true;
            sink.record(&MetricsRecord::Step(metrics))?;
            return Ok((model, false));
        }

        let mut grads = GradientsParams::from_grads(segment.backward(), &model);
        all_reduce_gradients::<B, M>(&model, &mut grads, group)?;
        let model = self.optim.step(lr, model, grads);
        self.schedule.step();
        ctx.boundary += 1;
        metrics.boundary = ctx.boundary;
        sink.record(&MetricsRecord::Step(metrics))?;
        Ok((model, true))
    }
}
