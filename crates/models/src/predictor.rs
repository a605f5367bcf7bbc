use burn::tensor::{backend::Backend, Tensor};

/// Output of one recurrent step.
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    /// `[batch, modes]` unnormalized mode scores.
    pub logits: Tensor<B, 2>,
    /// `[batch, modes, num_pts, 3]` candidate trajectories in the step's local frame.
    pub trajectories: Tensor<B, 4>,
    /// `[layers, batch, hidden]` state to feed into the next step.
    pub hidden: Tensor<B, 3>,
}

/// A model stepped one frame pair at a time with an explicit hidden state.
pub trait RecurrentPredictor<B: Backend> {
    /// Zero state for a fresh window, `[layers, batch, hidden]`.
    fn init_hidden(&self, batch: usize, device: &B::Device) -> Tensor<B, 3>;

    /// `frames` is `[batch, 6, H, W]`: previous RGB frame stacked on the current one.
    fn predict(&self, frames: Tensor<B, 4>, hidden: Tensor<B, 3>) -> Prediction<B>;
}
