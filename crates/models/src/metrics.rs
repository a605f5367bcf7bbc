//! Displacement errors for validation, accumulated on the host.

use burn::tensor::{backend::Backend, Tensor};

/// Running sums over predicted steps; divide via the accessors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplacementErrors {
    pub count: f64,
    /// Average displacement of the most probable mode.
    pub ade_sum: f64,
    /// Final displacement of the most probable mode.
    pub fde_sum: f64,
    /// Best-of-M average displacement.
    pub min_ade_sum: f64,
}

impl DisplacementErrors {
    pub fn merge(&mut self, other: &DisplacementErrors) {
        self.count += other.count;
        self.ade_sum += other.ade_sum;
        self.fde_sum += other.fde_sum;
        self.min_ade_sum += other.min_ade_sum;
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.count > 0.0 {
            sum / self.count
        } else {
            0.0
        }
    }

    pub fn ade(&self) -> f64 {
        self.mean(self.ade_sum)
    }

    pub fn fde(&self) -> f64 {
        self.mean(self.fde_sum)
    }

    pub fn min_ade(&self) -> f64 {
        self.mean(self.min_ade_sum)
    }

    /// Flat layout for collective reductions.
    pub fn to_array(&self) -> [f32; 4] {
        [
            self.count as f32,
            self.ade_sum as f32,
            self.fde_sum as f32,
            self.min_ade_sum as f32,
        ]
    }

    pub fn from_array(v: [f32; 4]) -> Self {
        Self {
            count: v[0] as f64,
            ade_sum: v[1] as f64,
            fde_sum: v[2] as f64,
            min_ade_sum: v[3] as f64,
        }
    }
}

/// Errors for one step of a batch. Shapes as in [`crate::StepLoss`].
pub fn displacement_errors<B: Backend>(
    logits: Tensor<B, 2>,
    trajectories: Tensor<B, 4>,
    labels: Tensor<B, 3>,
) -> DisplacementErrors {
    let [batch, modes, points, _] = trajectories.dims();
    let logits = logits.into_data().to_vec::<f32>().unwrap_or_default();
    let trajectories = trajectories.into_data().to_vec::<f32>().unwrap_or_default();
    let labels = labels.into_data().to_vec::<f32>().unwrap_or_default();
    displacement_errors_host(&logits, &trajectories, &labels, batch, modes, points)
}

/// Host variant over row-major buffers; malformed buffers contribute nothing.
pub fn displacement_errors_host(
    logits: &[f32],
    trajectories: &[f32],
    labels: &[f32],
    batch: usize,
    modes: usize,
    points: usize,
) -> DisplacementErrors {
    let mut out = DisplacementErrors::default();
    if points == 0
        || modes == 0
        || logits.len() != batch * modes
        || trajectories.len() != batch * modes * points * 3
        || labels.len() != batch * points * 3
    {
        return out;
    }

    for b in 0..batch {
        let label = &labels[b * points * 3..(b + 1) * points * 3];
        let errors: Vec<(f64, f64)> = (0..modes)
            .map(|m| {
                let start = (b * modes + m) * points * 3;
                point_errors(&trajectories[start..start + points * 3], label)
            })
            .collect();
        let scores = &logits[b * modes..(b + 1) * modes];
        let top = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        out.count += 1.0;
        out.ade_sum += errors[top].0;
        out.fde_sum += errors[top].1;
        out.min_ade_sum += errors.iter().map(|e| e.0).fold(f64::INFINITY, f64::min);
    }
    out
}

/// (average, final) L2 displacement between two `[points, 3]` buffers.
fn point_errors(pred: &[f32], label: &[f32]) -> (f64, f64) {
    let dists: Vec<f64> = pred
        .chunks_exact(3)
        .zip(label.chunks_exact(3))
        .map(|(p, l)| {
            let dx = (p[0] - l[0]) as f64;
            let dy = (p[1] - l[1]) as f64;
            let dz = (p[2] - l[2]) as f64;
            (dx * dx + dy * dy + dz * dz).sqrt()
        })
        .collect();
    let ade = dists.iter().sum::<f64>() / dists.len().max(1) as f64;
    (ade, dists.last().copied().unwrap_or(0.0))
}
