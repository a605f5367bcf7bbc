//! Validation pass: step every window without gradients and reduce errors across ranks.

use crate::error::TrainResult;
use crate::lockstep::{next_in_lockstep, Lockstep};
use crate::metrics::ValidationReport;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use collective::{Collective, ReduceOp};
use models::{displacement_errors, DisplacementErrors, RecurrentPredictor, StepLoss};
use sequence_dataset::SequenceLoader;

pub fn evaluate<B, M, L>(
    model: &M,
    loss: &L,
    mtp_alpha: f32,
    loader: &SequenceLoader,
    epoch: usize,
    group: &mut dyn Collective,
    device: &B::Device,
) -> TrainResult<ValidationReport>
where
    B: Backend,
    M: RecurrentPredictor<B>,
    L: StepLoss<B>,
{
    let mut errors = DisplacementErrors::default();
    let mut loss_sum = 0.0f64;
    let mut loss_steps = 0.0f64;
    let strict = loader.dataset_config().strict_assets;
    let mut iter = loader.epoch(0);

    loop {
        let batch = match next_in_lockstep(&mut iter, group, strict)? {
            Lockstep::Batch(batch) => batch,
            Lockstep::Skip => continue,
            Lockstep::Done => break,
        };
        let (frames, labels) = batch.to_tensors::<B>(device);
        let [b, steps, c, h, w] = frames.dims();
        let points = batch.num_pts;
        let mut hidden = model.init_hidden(b, device);
        for t in 0..steps {
            let x = frames
                .clone()
                .slice([0..b, t..t + 1, 0..c, 0..h, 0..w])
                .reshape([b, c, h, w]);
            let y: Tensor<B, 3> = labels
                .clone()
                .slice([0..b, t..t + 1, 0..points, 0..3])
                .reshape([b, points, 3]);
            let pred = model.predict(x, hidden);
            hidden = pred.hidden;
            let step = loss
                .step_loss(pred.logits.clone(), pred.trajectories.clone(), y.clone())
                .combined(mtp_alpha)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap_or_default();
            if let Some(v) = step.first().filter(|v| v.is_finite()) {
                loss_sum += *v as f64;
                loss_steps += 1.0;
            }
            errors.merge(&displacement_errors(pred.logits, pred.trajectories, y));
        }
    }

    let e = errors.to_array();
    let mut totals = [e[0], e[1], e[2], e[3], loss_sum as f32, loss_steps as f32];
    group.all_reduce(&mut totals, ReduceOp::Sum)?;
    let errors = DisplacementErrors::from_array([totals[0], totals[1], totals[2], totals[3]]);
    let report = ValidationReport {
        epoch,
        steps: errors.count,
        loss: if totals[5] > 0.0 {
            (totals[4] / totals[5]) as f64
        } else {
            0.0
        },
        ade: errors.ade(),
        fde: errors.fde(),
        min_ade: errors.min_ade(),
    };
    tracing::info!(
        epoch,
        steps = report.steps,
        loss = report.loss,
        ade = report.ade,
        fde = report.fde,
        min_ade = report.min_ade,
        "validation"
    );
    Ok(report)
}
