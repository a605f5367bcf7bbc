use approx::assert_abs_diff_eq;
use burn::backend::NdArray;
use burn::tensor::{Tensor, TensorData};
use models::{
    displacement_errors_host, RecurrentPredictor, SequencePlanner, SequencePlannerConfig,
    StepLoss, TrajectoryLoss,
};

type B = NdArray<f32>;

fn tiny_config() -> SequencePlannerConfig {
    SequencePlannerConfig {
        num_modes: 3,
        num_pts: 4,
        hidden_size: 16,
        num_layers: 2,
        encoder_channels: vec![4, 8],
        feature_dim: 12,
    }
}

fn values<const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}

#[test]
fn predict_shapes_and_state() {
    let device = Default::default();
    let model = SequencePlanner::<B>::new(tiny_config(), &device);
    let hidden = model.init_hidden(2, &device);
    assert_eq!(hidden.dims(), [2, 2, 16]);
    assert!(values(hidden.clone()).iter().all(|v| *v == 0.0));

    let frames = Tensor::<B, 4>::ones([2, 6, 16, 32], &device);
    let out = model.predict(frames.clone(), hidden);
    assert_eq!(out.logits.dims(), [2, 3]);
    assert_eq!(out.trajectories.dims(), [2, 3, 4, 3]);
    assert_eq!(out.hidden.dims(), [2, 2, 16]);

    // State evolves across steps.
    let again = model.predict(frames, out.hidden.clone());
    let a = values(out.hidden);
    let b = values(again.hidden);
    assert!(a.iter().zip(&b).any(|(x, y)| (x - y).abs() > 1e-7));
}

#[test]
fn gru_output_is_bounded_from_zero_state() {
    let device = Default::default();
    let cell = models::GruCell::<B>::new(3, 5, &device);
    let x = Tensor::<B, 2>::zeros([1, 3], &device);
    let h = Tensor::<B, 2>::zeros([1, 5], &device);
    let out = cell.forward(x, h);
    assert_eq!(out.dims(), [1, 5]);
    assert!(values(out).iter().all(|v| v.abs() < 1.0));
}

fn labels_and_modes(offsets: [f32; 3]) -> (Tensor<B, 4>, Tensor<B, 3>) {
    let device = Default::default();
    let label: Vec<f32> = (0..4).flat_map(|k| [k as f32, 0.0, 0.0]).collect();
    let mut modes = Vec::new();
    for off in offsets {
        modes.extend(label.iter().enumerate().map(|(i, v)| {
            if i % 3 == 1 {
                v + off
            } else {
                *v
            }
        }));
    }
    (
        Tensor::from_floats(TensorData::new(modes, [1, 3, 4, 3]), &device),
        Tensor::from_floats(TensorData::new(label, [1, 4, 3]), &device),
    )
}

#[test]
fn loss_selects_the_closest_mode() {
    let device = Default::default();
    let (traj, labels) = labels_and_modes([5.0, 0.5, -3.0]);
    let loss = TrajectoryLoss::default();
    let one_hot = values(loss.winning_modes(traj.clone(), labels.clone()));
    assert_eq!(one_hot, vec![0.0, 1.0, 0.0]);

    let logits = Tensor::<B, 2>::zeros([1, 3], &device);
    let out = loss.step_loss(logits, traj, labels);
    assert_abs_diff_eq!(values(out.cls)[0], 3.0f32.ln(), epsilon = 1e-5);
    let reg = values(out.reg);
    assert_eq!(reg.len(), 3);
    assert_abs_diff_eq!(reg[0], 0.0, epsilon = 1e-6);
    // 0.5 * 0.5^2 on every point's y.
    assert_abs_diff_eq!(reg[1], 0.125, epsilon = 1e-6);
    assert_abs_diff_eq!(reg[2], 0.0, epsilon = 1e-6);
}

#[test]
fn regression_is_linear_beyond_beta() {
    let device = Default::default();
    let (traj, labels) = labels_and_modes([3.0, 4.0, 5.0]);
    let out = TrajectoryLoss::default().step_loss(
        Tensor::<B, 2>::zeros([1, 3], &device),
        traj,
        labels,
    );
    assert_abs_diff_eq!(values(out.reg.clone())[1], 2.5, epsilon = 1e-5);
    let combined = values(out.combined(1.0))[0];
    assert_abs_diff_eq!(combined, 3.0f32.ln() + 2.5 / 3.0, epsilon = 1e-5);
}

#[test]
fn displacement_errors_use_top_mode_and_best_mode() {
    // One sample, two modes, two points. Mode 0 scores higher but is 1 m off everywhere.
    let labels = [0.0, 0.0, 0.0, 2.0, 0.0, 0.0];
    let trajectories = [
        0.0, 1.0, 0.0, 2.0, 1.0, 0.0, // mode 0
        0.0, 0.0, 0.0, 2.0, 0.0, 0.0, // mode 1
    ];
    let logits = [2.0, 1.0];
    let e = displacement_errors_host(&logits, &trajectories, &labels, 1, 2, 2);
    assert_eq!(e.count, 1.0);
    assert_abs_diff_eq!(e.ade(), 1.0);
    assert_abs_diff_eq!(e.fde(), 1.0);
    assert_abs_diff_eq!(e.min_ade(), 0.0);

    let mut total = e;
    total.merge(&displacement_errors_host(&[0.0, 5.0], &trajectories, &labels, 1, 2, 2));
    assert_abs_diff_eq!(total.ade(), 0.5);
    assert_eq!(models::DisplacementErrors::from_array(total.to_array()), total);

    let empty = displacement_errors_host(&[1.0], &trajectories, &labels, 1, 2, 2);
    assert_eq!(empty.count, 0.0);
}
