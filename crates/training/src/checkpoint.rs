//! Per-epoch checkpoints: Burn weights plus a small JSON of loop state for resuming.

use crate::error::{TrainError, TrainResult};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const PREFIX: &str = "planner_epoch_";

/// Loop state saved next to the weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Last completed epoch.
    pub epoch: usize,
    pub boundary: usize,
    pub lr_steps: usize,
    pub world_size: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

fn checkpoint_err(path: &Path, reason: impl ToString) -> TrainError {
    TrainError::Checkpoint {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Weights path without extension; the recorder appends `.bin`.
    pub fn stem(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{PREFIX}{epoch:04}"))
    }

    fn meta_path(&self, epoch: usize) -> PathBuf {
        self.stem(epoch).with_extension("json")
    }

    pub fn save<B: Backend, M: Module<B>>(&self, model: &M, meta: &CheckpointMeta) -> TrainResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| checkpoint_err(&self.dir, e))?;
        let stem = self.stem(meta.epoch);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(&stem, &recorder)
            .map_err(|e| checkpoint_err(&stem, e))?;
        let meta_path = self.meta_path(meta.epoch);
        let json = serde_json::to_vec_pretty(meta).map_err(|e| checkpoint_err(&meta_path, e))?;
        fs::write(&meta_path, json).map_err(|e| checkpoint_err(&meta_path, e))?;
        tracing::info!(epoch = meta.epoch, path = %stem.display(), "saved checkpoint");
        Ok(stem)
    }

    /// Highest epoch with both weights and metadata on disk.
    pub fn latest(&self) -> Option<usize> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix(PREFIX)?
                    .strip_suffix(".bin")?
                    .parse::<usize>()
                    .ok()
            })
            .filter(|epoch| self.meta_path(*epoch).exists())
            .max()
    }

    pub fn load_meta(&self, epoch: usize) -> TrainResult<CheckpointMeta> {
        let path = self.meta_path(epoch);
        let raw = fs::read(&path).map_err(|e| checkpoint_err(&path, e))?;
        serde_json::from_slice(&raw).map_err(|e| checkpoint_err(&path, e))
    }

    /// Load weights for `epoch` into `model`.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        model: M,
        epoch: usize,
        device: &B::Device,
    ) -> TrainResult<M> {
        load_weights(model, &self.stem(epoch), device)
    }
}

/// Load a weights file (with or without the `.bin` extension).
pub fn load_weights<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> TrainResult<M> {
    let stem = if path.extension().is_some_and(|ext| ext == "bin") {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(&stem, &recorder, device)
        .map_err(|e| checkpoint_err(&stem, e))
}
