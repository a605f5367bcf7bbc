//! Winner-take-all multi-modal trajectory loss.

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Per-step loss terms before weighting.
#[derive(Debug, Clone)]
pub struct StepLossOutput<B: Backend> {
    /// `[1]` mode classification loss.
    pub cls: Tensor<B, 1>,
    /// `[3]` regression loss per axis (x, y, z).
    pub reg: Tensor<B, 1>,
}

impl<B: Backend> StepLossOutput<B> {
    /// `cls + alpha * mean(reg)`, shape `[1]`.
    pub fn combined(&self, alpha: f32) -> Tensor<B, 1> {
        self.cls.clone() + self.reg.clone().mean() * alpha
    }
}

pub trait StepLoss<B: Backend> {
    /// `logits: [B, M]`, `trajectories: [B, M, P, 3]`, `labels: [B, P, 3]`.
    fn step_loss(
        &self,
        logits: Tensor<B, 2>,
        trajectories: Tensor<B, 4>,
        labels: Tensor<B, 3>,
    ) -> StepLossOutput<B>;
}

/// Picks the mode closest to the label (mean L2 over points), then applies
/// cross-entropy towards that mode and smooth-L1 on its trajectory.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryLoss {
    /// Smooth-L1 transition point.
    pub beta: f32,
}

impl Default for TrajectoryLoss {
    fn default() -> Self {
        Self { beta: 1.0 }
    }
}

impl TrajectoryLoss {
    /// One-hot `[B, M]` of the closest mode per sample. Selection is not differentiated.
    pub fn winning_modes<B: Backend>(
        &self,
        trajectories: Tensor<B, 4>,
        labels: Tensor<B, 3>,
    ) -> Tensor<B, 2> {
        let [batch, modes, points, _] = trajectories.dims();
        let device = trajectories.device();
        let target = labels.unsqueeze_dim::<4>(1).expand([batch, modes, points, 3]);
        let diff = trajectories.detach() - target.detach();
        let dist = (diff.clone() * diff)
            .sum_dim(3)
            .sqrt()
            .mean_dim(2)
            .reshape([batch, modes]);
        let dist = dist.into_data().to_vec::<f32>().unwrap_or_default();

        let mut one_hot = vec![0.0f32; batch * modes];
        for b in 0..batch {
            let row = dist.get(b * modes..(b + 1) * modes).unwrap_or(&[]);
            let best = row
                .iter()
                .enumerate()
                .fold((0usize, f32::INFINITY), |(bi, bv), (i, &v)| {
                    if v < bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0;
            one_hot[b * modes + best] = 1.0;
        }
        Tensor::from_floats(TensorData::new(one_hot, [batch, modes]), &device)
    }
}

impl<B: Backend> StepLoss<B> for TrajectoryLoss {
    fn step_loss(
        &self,
        logits: Tensor<B, 2>,
        trajectories: Tensor<B, 4>,
        labels: Tensor<B, 3>,
    ) -> StepLossOutput<B> {
        let [batch, modes, points, _] = trajectories.dims();
        let one_hot = self.winning_modes(trajectories.clone(), labels.clone());

        let cls = (log_softmax(logits, 1) * one_hot.clone())
            .sum_dim(1)
            .neg()
            .mean();

        let mask = one_hot
            .reshape([batch, modes, 1, 1])
            .expand([batch, modes, points, 3]);
        let best = (trajectories * mask)
            .sum_dim(1)
            .reshape([batch, points, 3]);

        // Smooth L1: 0.5 d^2 / beta below beta, d - 0.5 beta above.
        let beta = self.beta.max(f32::EPSILON);
        let d = (best - labels).abs();
        let q = d.clone().clamp_max(beta);
        let per_elem = q.clone() * (d - q * 0.5) / beta;
        let reg = per_elem.reshape([batch * points, 3]).mean_dim(0).reshape([3]);

        StepLossOutput { cls, reg }
    }
}
