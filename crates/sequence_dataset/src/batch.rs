//! Host-side batch assembly and conversion to Burn tensors.

use crate::sample::SequenceSample;
use crate::types::{DatasetError, DatasetResult, PAIR_CHANNELS};
use burn::tensor::{backend::Backend, Tensor};

/// A batch of equal-length windows stored as flat row-major host buffers.
#[derive(Debug, Clone)]
pub struct SequenceBatch {
    pub ids: Vec<String>,
    pub batch: usize,
    pub seq_len: usize,
    pub height: usize,
    pub width: usize,
    pub num_pts: usize,
    /// `[batch, seq_len, 6, height, width]`
    pub frames: Vec<f32>,
    /// `[batch, seq_len, num_pts, 3]`
    pub labels: Vec<f32>,
}

pub fn collate(
    samples: Vec<SequenceSample>,
    height: usize,
    width: usize,
    num_pts: usize,
) -> DatasetResult<SequenceBatch> {
    let Some(first) = samples.first() else {
        return Err(DatasetError::Other("cannot collate empty batch".to_string()));
    };
    let seq_len = first.window.len();
    let frame_elems = seq_len * PAIR_CHANNELS * height * width;
    let label_elems = seq_len * num_pts * 3;

    let batch = samples.len();
    let mut ids = Vec::with_capacity(batch);
    let mut frames = Vec::with_capacity(batch * frame_elems);
    let mut labels = Vec::with_capacity(batch * label_elems);
    for sample in samples {
        if sample.frames.len() != frame_elems || sample.labels.len() != label_elems {
            return Err(DatasetError::Other(format!(
                "sample {} does not match batch layout (frames {} vs {frame_elems}, labels {} vs {label_elems})",
                sample.id,
                sample.frames.len(),
                sample.labels.len()
            )));
        }
        frames.extend_from_slice(&sample.frames);
        labels.extend_from_slice(&sample.labels);
        ids.push(sample.id);
    }

    Ok(SequenceBatch {
        ids,
        batch,
        seq_len,
        height,
        width,
        num_pts,
        frames,
        labels,
    })
}

impl SequenceBatch {
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 5>, Tensor<B, 4>) {
        let frames = Tensor::<B, 1>::from_floats(self.frames.as_slice(), device).reshape([
            self.batch,
            self.seq_len,
            PAIR_CHANNELS,
            self.height,
            self.width,
        ]);
        let labels = Tensor::<B, 1>::from_floats(self.labels.as_slice(), device).reshape([
            self.batch,
            self.seq_len,
            self.num_pts,
            3,
        ]);
        (frames, labels)
    }
}
