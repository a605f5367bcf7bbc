//! Core types, error definitions, and configuration for sequence_dataset.

use crate::localize::LocalizeError;
use crate::window::WindowError;
use data_contracts::ContractError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Per-channel RGB mean of the training frames after scaling to `[0, 1]`.
pub const FRAME_MEAN: [f32; 3] = [0.3890, 0.3937, 0.3851];
/// Per-channel RGB standard deviation of the training frames.
pub const FRAME_STD: [f32; 3] = [0.2172, 0.2141, 0.2209];

/// Channels of one predictor input: previous RGB frame stacked on the current one.
pub const PAIR_CHANNELS: usize = 6;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("sequence {id} is too short ({length} < {required})")]
    SequenceTooShort {
        id: String,
        length: usize,
        required: usize,
    },
    #[error("asset unavailable for sequence {id}: {reason}")]
    AssetUnavailable { id: String, reason: String },
    #[error("cannot localize sequence {id}: {source}")]
    Localize {
        id: String,
        #[source]
        source: LocalizeError,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("{0}")]
    Other(String),
}

impl DatasetError {
    pub fn from_window(id: &str, err: WindowError) -> Self {
        match err {
            WindowError::SequenceTooShort { length, required } => DatasetError::SequenceTooShort {
                id: id.to_string(),
                length,
                required,
            },
            WindowError::EmptyWindow => DatasetError::Other(err.to_string()),
        }
    }

    /// Sample-level failures the loader may skip or replace.
    ///
    /// A horizon failure means the windowing arithmetic is wrong, so it only counts as
    /// recoverable in release builds.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DatasetError::SequenceTooShort { .. }
            | DatasetError::AssetUnavailable { .. }
            | DatasetError::Image { .. }
            | DatasetError::Contract(_) => true,
            DatasetError::Localize { .. } => !cfg!(debug_assertions),
            DatasetError::Other(_) => false,
        }
    }
}

/// Sample assembly settings shared by training and validation loaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Steps per training window.
    pub fix_seq_length: usize,
    /// Future points per local trajectory label.
    pub num_pts: usize,
    /// Frame size after resizing, `(width, height)`.
    pub target_size: (u32, u32),
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Lower bound applied to the forward (x) coordinate of every label point.
    pub forward_clamp: Option<f32>,
    /// Replacement draws after a failed sample before it is dropped from the batch.
    pub max_replacements: usize,
    /// Treat every sample failure as fatal instead of replacing it.
    pub strict_assets: bool,
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            fix_seq_length: 40,
            num_pts: 20,
            target_size: (256, 128),
            mean: FRAME_MEAN,
            std: FRAME_STD,
            forward_clamp: None,
            max_replacements: 8,
            strict_assets: false,
            seed: 0,
        }
    }
}
