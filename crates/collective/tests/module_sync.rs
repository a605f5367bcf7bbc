use approx::assert_abs_diff_eq;
use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig};
use burn::optim::GradientsParams;
use burn::tensor::{backend::Backend, Tensor};
use collective::{all_reduce_gradients, sync_module_state, Collective, LocalGroup, StateSync};
use std::thread;
use std::time::Duration;

type B = Autodiff<NdArray<f32>>;

#[derive(Module, Debug)]
struct Tiny<B: Backend> {
    linear: Linear<B>,
    norm: BatchNorm<B, 2>,
}

fn tiny(device: &<B as Backend>::Device) -> Tiny<B> {
    Tiny {
        linear: LinearConfig::new(3, 2).init(device),
        norm: BatchNormConfig::new(2).init(device),
    }
}

fn host<const D: usize, BK: Backend>(t: Tensor<BK, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}

fn spawn_ranks<T: Send + 'static>(
    world: usize,
    f: impl Fn(LocalGroup) -> T + Send + Clone + 'static,
) -> Vec<T> {
    let handles: Vec<_> = LocalGroup::new_group(world, Duration::from_secs(10))
        .into_iter()
        .map(|g| {
            let f = f.clone();
            thread::spawn(move || f(g))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn broadcast_makes_replicas_identical() {
    let weights = spawn_ranks(3, |mut group| {
        let device = Default::default();
        let model = sync_module_state(tiny(&device), &mut group, StateSync::Broadcast { root: 0 })
            .unwrap();
        assert!(model.linear.weight.val().is_require_grad());
        (host(model.linear.weight.val()), host(model.norm.gamma.val()))
    });
    assert!(weights.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn gradients_are_averaged_across_ranks() {
    let grads = spawn_ranks(2, |mut group| {
        let device = Default::default();
        let model = tiny(&device);
        let x = if group.rank() == 0 { 1.0 } else { 3.0 };
        let input = Tensor::<B, 2>::from_floats([[x, 2.0 * x, 0.0]], &device);
        let loss = model.linear.forward(input).sum();
        let mut grads = GradientsParams::from_grads(loss.backward(), &model);
        all_reduce_gradients(&model, &mut grads, &mut group).unwrap();
        let w = grads
            .get::<NdArray<f32>, 2>(model.linear.weight.id.clone())
            .unwrap();
        let b = model
            .linear
            .bias
            .as_ref()
            .and_then(|bias| grads.get::<NdArray<f32>, 1>(bias.id.clone()))
            .unwrap();
        // The norm layer took no part in the loss on any rank.
        let gamma = grads.get::<NdArray<f32>, 1>(model.norm.gamma.id.clone());
        (host(w), host(b), gamma.is_none())
    });
    for (w, b, gamma_missing) in grads {
        // d(sum(xW + b))/dW[i][j] = x[i], averaged over x = 1 and x = 3.
        assert_eq!(w, vec![2.0, 2.0, 4.0, 4.0, 0.0, 0.0]);
        assert_eq!(b, vec![1.0, 1.0]);
        assert!(gamma_missing);
    }
}

#[test]
fn running_statistics_are_averaged() {
    let stats = spawn_ranks(2, |mut group| {
        let device = Default::default();
        let model = tiny(&device);
        let value = if group.rank() == 0 { 1.0 } else { 3.0 };
        let _ = model
            .norm
            .forward(Tensor::<B, 4>::full([2, 2, 2, 2], value, &device));
        let before = host(model.norm.running_mean.value());
        let weight_before = host(model.linear.weight.val());
        let model = sync_module_state(model, &mut group, StateSync::MeanBuffers).unwrap();
        (
            before,
            host(model.norm.running_mean.value()),
            weight_before == host(model.linear.weight.val()),
        )
    });
    assert_abs_diff_eq!(stats[0].0[0], 0.1, epsilon = 1e-6);
    assert_abs_diff_eq!(stats[1].0[0], 0.3, epsilon = 1e-6);
    for (_, after, weights_untouched) in &stats {
        assert_abs_diff_eq!(after[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(after[1], 0.2, epsilon = 1e-6);
        assert!(weights_untouched);
    }
}
