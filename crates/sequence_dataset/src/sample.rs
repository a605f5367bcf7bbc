//! One training example: a random window of frame pairs plus its local trajectory labels.

use crate::localize::{flatten_labels, localize_window};
use crate::preprocess::FrameTransform;
use crate::source::SequenceSource;
use crate::types::{DatasetConfig, DatasetError, DatasetResult, PAIR_CHANNELS};
use crate::window::{sample_window, Window};
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct SequenceSample {
    pub id: String,
    /// Dataset index actually loaded (differs from the requested one after a replacement).
    pub index: usize,
    pub window: Window,
    /// `[fix_seq_length, 6, H, W]`, previous frame channels first.
    pub frames: Vec<f32>,
    /// `[fix_seq_length, num_pts, 3]` in each step's local frame.
    pub labels: Vec<f32>,
}

pub fn load_sample(
    source: &dyn SequenceSource,
    idx: usize,
    cfg: &DatasetConfig,
    transform: &FrameTransform,
    rng: &mut StdRng,
) -> DatasetResult<SequenceSample> {
    let id = source.id(idx);
    let (length, poses) = source.load_index(idx)?;
    let window = sample_window(length, cfg.fix_seq_length, cfg.num_pts, rng)
        .map_err(|e| DatasetError::from_window(&id, e))?;

    let pose_range = window.pose_range(cfg.num_pts);
    let (Some(positions), Some(orientations)) = (
        poses.frame_positions.get(pose_range.clone()),
        poses.frame_orientations.get(pose_range.clone()),
    ) else {
        return Err(DatasetError::AssetUnavailable {
            id,
            reason: format!("pose log shorter than required range {pose_range:?}"),
        });
    };
    let trajectories = localize_window(positions, orientations, window.len(), cfg.num_pts)
        .map_err(|source| DatasetError::Localize {
            id: id.clone(),
            source,
        })?;
    let mut labels = flatten_labels(&trajectories);
    if let Some(min_forward) = cfg.forward_clamp {
        for point in labels.chunks_exact_mut(3) {
            point[0] = point[0].max(min_forward);
        }
    }

    let images = source.load_frames(idx, window.frame_range())?;
    let mut normalized: Vec<Vec<f32>> = images.iter().map(|img| transform.apply(img)).collect();
    if !window.has_lead_frame() {
        // No predecessor exists for the first step; pair it with itself.
        if let Some(first) = normalized.first().cloned() {
            normalized.insert(0, first);
        }
    }
    if normalized.len() != window.len() + 1 {
        return Err(DatasetError::AssetUnavailable {
            id,
            reason: format!(
                "expected {} frames, decoded {}",
                window.len() + 1,
                normalized.len()
            ),
        });
    }

    let frame_len = transform.frame_len();
    let mut frames = Vec::with_capacity(window.len() * PAIR_CHANNELS / 3 * frame_len);
    for pair in normalized.windows(2) {
        frames.extend_from_slice(&pair[0]);
        frames.extend_from_slice(&pair[1]);
    }

    Ok(SequenceSample {
        id,
        index: idx,
        window,
        frames,
        labels,
    })
}

/// Load `idx`, replacing failed samples with random other sequences.
///
/// Returns `Ok(None)` when every attempt failed with a recoverable error; unrecoverable
/// errors (or any error with `strict_assets`) are returned as-is.
pub fn load_with_replacement(
    source: &dyn SequenceSource,
    idx: usize,
    cfg: &DatasetConfig,
    transform: &FrameTransform,
    rng: &mut StdRng,
) -> DatasetResult<Option<SequenceSample>> {
    let mut current = idx;
    for attempt in 0..=cfg.max_replacements {
        match load_sample(source, current, cfg, transform, rng) {
            Ok(sample) => return Ok(Some(sample)),
            Err(e) if cfg.strict_assets || !e.is_recoverable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    sequence = %source.id(current),
                    attempt,
                    "skipping sample: {e}"
                );
                if source.is_empty() {
                    break;
                }
                current = rng.random_range(0..source.len());
            }
        }
    }
    Ok(None)
}
