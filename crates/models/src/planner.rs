//! Convolutional frame-pair encoder feeding a stacked GRU with mode and trajectory heads.
//!
//! Shapes:
//! - Input frame pair: `[B, 6, H, W]`
//! - Hidden state: `[layers, B, hidden_size]`
//! - Mode logits: `[B, modes]`
//! - Trajectories: `[B, modes, num_pts, 3]`

use crate::predictor::{Prediction, RecurrentPredictor};
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::{relu, sigmoid, tanh};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

const INPUT_CHANNELS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencePlannerConfig {
    /// Candidate trajectories per step (`M`).
    pub num_modes: usize,
    pub num_pts: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    /// Output channels of each stride-2 conv block.
    pub encoder_channels: Vec<usize>,
    pub feature_dim: usize,
}

impl Default for SequencePlannerConfig {
    fn default() -> Self {
        Self {
            num_modes: 3,
            num_pts: 20,
            hidden_size: 512,
            num_layers: 2,
            encoder_channels: vec![32, 64, 128, 256],
            feature_dim: 512,
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(out_channels).init(device);
        Self { conv, norm }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(x)))
    }
}

/// Single GRU layer (reset, update, candidate gates).
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    input: Linear<B>,
    recurrent: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            input: LinearConfig::new(input_size, 3 * hidden_size).init(device),
            recurrent: LinearConfig::new(hidden_size, 3 * hidden_size).init(device),
            hidden_size,
        }
    }

    /// `x: [B, input]`, `h: [B, hidden]` -> `[B, hidden]`.
    pub fn forward(&self, x: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let gi = self.input.forward(x);
        let gh = self.recurrent.forward(h.clone());
        let reset = sigmoid(self.gate(&gi, 0) + self.gate(&gh, 0));
        let update = sigmoid(self.gate(&gi, 1) + self.gate(&gh, 1));
        let candidate = tanh(self.gate(&gi, 2) + reset * self.gate(&gh, 2));
        candidate.clone() + update * (h - candidate)
    }

    fn gate(&self, packed: &Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
        let batch = packed.dims()[0];
        let hs = self.hidden_size;
        packed.clone().slice([0..batch, k * hs..(k + 1) * hs])
    }
}

#[derive(Module, Debug)]
pub struct SequencePlanner<B: Backend> {
    encoder: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    project: Linear<B>,
    gru: Vec<GruCell<B>>,
    mode_head: Linear<B>,
    trajectory_head: Linear<B>,
    pub config: Ignored<SequencePlannerConfig>,
}

impl<B: Backend> SequencePlanner<B> {
    pub fn new(config: SequencePlannerConfig, device: &B::Device) -> Self {
        let mut encoder = Vec::with_capacity(config.encoder_channels.len());
        let mut channels = INPUT_CHANNELS;
        for &out in &config.encoder_channels {
            encoder.push(ConvBlock::new(channels, out, device));
            channels = out;
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let project = LinearConfig::new(channels, config.feature_dim).init(device);

        let layers = config.num_layers.max(1);
        let mut gru = Vec::with_capacity(layers);
        for layer in 0..layers {
            let input = if layer == 0 {
                config.feature_dim
            } else {
                config.hidden_size
            };
            gru.push(GruCell::new(input, config.hidden_size, device));
        }

        let modes = config.num_modes.max(1);
        let mode_head = LinearConfig::new(config.hidden_size, modes).init(device);
        let trajectory_head =
            LinearConfig::new(config.hidden_size, modes * config.num_pts * 3).init(device);

        Self {
            encoder,
            pool,
            project,
            gru,
            mode_head,
            trajectory_head,
            config: Ignored(config),
        }
    }

    pub fn num_modes(&self) -> usize {
        self.config.num_modes.max(1)
    }

    pub fn num_pts(&self) -> usize {
        self.config.num_pts
    }

    fn encode(&self, frames: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = frames;
        for block in &self.encoder {
            x = block.forward(x);
        }
        let [batch, channels, _, _] = x.dims();
        let pooled = self.pool.forward(x).reshape([batch, channels]);
        relu(self.project.forward(pooled))
    }
}

impl<B: Backend> RecurrentPredictor<B> for SequencePlanner<B> {
    fn init_hidden(&self, batch: usize, device: &B::Device) -> Tensor<B, 3> {
        Tensor::zeros([self.gru.len(), batch, self.config.hidden_size], device)
    }

    fn predict(&self, frames: Tensor<B, 4>, hidden: Tensor<B, 3>) -> Prediction<B> {
        let mut x = self.encode(frames);
        let batch = x.dims()[0];
        let hs = self.config.hidden_size;

        let mut next = Vec::with_capacity(self.gru.len());
        for (layer, cell) in self.gru.iter().enumerate() {
            let h = hidden
                .clone()
                .slice([layer..layer + 1, 0..batch, 0..hs])
                .reshape([batch, hs]);
            x = cell.forward(x, h);
            next.push(x.clone().reshape([1, batch, hs]));
        }

        let logits = self.mode_head.forward(x.clone());
        let trajectories = self.trajectory_head.forward(x).reshape([
            batch,
            self.num_modes(),
            self.config.num_pts,
            3,
        ]);
        Prediction {
            logits,
            trajectories,
            hidden: Tensor::cat(next, 0),
        }
    }
}
