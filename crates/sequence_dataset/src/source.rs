//! Sequence sources: where frames and global poses come from.

use crate::types::{DatasetError, DatasetResult};
use data_contracts::{PoseLog, SplitList};
use image::RgbImage;
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const FRAMES_DIR: &str = "frames";
pub const POSE_FILE: &str = "global_pose.json";

/// Random-access collection of driving sequences.
pub trait SequenceSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable identifier used in logs and errors.
    fn id(&self, idx: usize) -> String;

    /// Usable length: frames with a matching pose record.
    fn sequence_length(&self, idx: usize) -> DatasetResult<usize>;

    fn load_poses(&self, idx: usize) -> DatasetResult<PoseLog>;

    /// Usable length and pose log together, for callers that need both.
    fn load_index(&self, idx: usize) -> DatasetResult<(usize, PoseLog)> {
        Ok((self.sequence_length(idx)?, self.load_poses(idx)?))
    }

    fn load_frames(&self, idx: usize, range: Range<usize>) -> DatasetResult<Vec<RgbImage>>;
}

/// Sequences on disk, listed by a split file:
///
/// ```text
/// <prefix>/<entry>/frames/000000.png ...
/// <prefix>/<entry>/global_pose.json
/// ```
#[derive(Debug)]
pub struct DirSequenceSource {
    prefix: PathBuf,
    split: SplitList,
    /// Frame listings made by `load_index`, taken by the following `load_frames`.
    listed: Mutex<HashMap<usize, Arc<Vec<PathBuf>>>>,
}

impl DirSequenceSource {
    pub fn new(prefix: impl Into<PathBuf>, split: SplitList) -> Self {
        Self {
            prefix: prefix.into(),
            split,
            listed: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_split_file(prefix: impl Into<PathBuf>, split_path: &Path) -> DatasetResult<Self> {
        Ok(Self::new(prefix, SplitList::load(split_path)?))
    }

    pub fn sequence_dir(&self, idx: usize) -> PathBuf {
        self.prefix.join(&self.split.entries[idx])
    }

    fn frame_paths(&self, idx: usize) -> DatasetResult<Vec<PathBuf>> {
        let dir = self.sequence_dir(idx).join(FRAMES_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| DatasetError::AssetUnavailable {
            id: self.id(idx),
            reason: format!("cannot list {}: {e}", dir.display()),
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| DatasetError::AssetUnavailable {
                    id: self.id(idx),
                    reason: e.to_string(),
                })?
                .path();
            let is_image = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn take_listing(&self, idx: usize) -> Option<Arc<Vec<PathBuf>>> {
        self.listed.lock().ok().and_then(|mut m| m.remove(&idx))
    }

    fn usable_length(&self, idx: usize, frames: usize, poses: usize) -> usize {
        if frames != poses {
            tracing::debug!(
                sequence = %self.id(idx),
                frames,
                poses,
                "frame and pose counts differ; using the shorter"
            );
        }
        frames.min(poses)
    }

    fn pose_log(&self, idx: usize) -> DatasetResult<PoseLog> {
        let path = self.sequence_dir(idx).join(POSE_FILE);
        if !path.exists() {
            return Err(DatasetError::AssetUnavailable {
                id: self.id(idx),
                reason: format!("missing {}", path.display()),
            });
        }
        let log = PoseLog::load(&path)?;
        log.validate()?;
        Ok(log)
    }
}

impl SequenceSource for DirSequenceSource {
    fn len(&self) -> usize {
        self.split.len()
    }

    fn id(&self, idx: usize) -> String {
        self.split
            .entries
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("#{idx}"))
    }

    fn sequence_length(&self, idx: usize) -> DatasetResult<usize> {
        let frames = self.frame_paths(idx)?.len();
        let poses = self.pose_log(idx)?.len();
        Ok(self.usable_length(idx, frames, poses))
    }

    fn load_poses(&self, idx: usize) -> DatasetResult<PoseLog> {
        self.pose_log(idx)
    }

    fn load_index(&self, idx: usize) -> DatasetResult<(usize, PoseLog)> {
        let frames = self.frame_paths(idx)?;
        let poses = self.pose_log(idx)?;
        let length = self.usable_length(idx, frames.len(), poses.len());
        if let Ok(mut listed) = self.listed.lock() {
            listed.insert(idx, Arc::new(frames));
        }
        Ok((length, poses))
    }

    fn load_frames(&self, idx: usize, range: Range<usize>) -> DatasetResult<Vec<RgbImage>> {
        let paths = match self.take_listing(idx) {
            Some(paths) => paths,
            None => Arc::new(self.frame_paths(idx)?),
        };
        let Some(selected) = paths.get(range.clone()) else {
            return Err(DatasetError::AssetUnavailable {
                id: self.id(idx),
                reason: format!("frames {range:?} out of {} on disk", paths.len()),
            });
        };
        selected
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| DatasetError::Image {
                        path: path.clone(),
                        source: e,
                    })
            })
            .collect()
    }
}

/// One in-memory sequence. `frames: None` simulates an asset that cannot be fetched.
#[derive(Debug, Clone)]
pub struct MemorySequence {
    pub id: String,
    pub frames: Option<Vec<RgbImage>>,
    pub poses: PoseLog,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySequenceSource {
    sequences: Vec<MemorySequence>,
}

impl MemorySequenceSource {
    pub fn new(sequences: Vec<MemorySequence>) -> Self {
        Self { sequences }
    }

    pub fn push(&mut self, sequence: MemorySequence) {
        self.sequences.push(sequence);
    }

    fn get(&self, idx: usize) -> DatasetResult<&MemorySequence> {
        self.sequences
            .get(idx)
            .ok_or_else(|| DatasetError::Other(format!("sequence index {idx} out of range")))
    }

    fn frames(&self, idx: usize) -> DatasetResult<&[RgbImage]> {
        let seq = self.get(idx)?;
        seq.frames
            .as_deref()
            .ok_or_else(|| DatasetError::AssetUnavailable {
                id: seq.id.clone(),
                reason: "frames unavailable".to_string(),
            })
    }
}

impl SequenceSource for MemorySequenceSource {
    fn len(&self) -> usize {
        self.sequences.len()
    }

    fn id(&self, idx: usize) -> String {
        self.sequences
            .get(idx)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| format!("#{idx}"))
    }

    fn sequence_length(&self, idx: usize) -> DatasetResult<usize> {
        let frames = self.frames(idx)?.len();
        Ok(frames.min(self.get(idx)?.poses.len()))
    }

    fn load_poses(&self, idx: usize) -> DatasetResult<PoseLog> {
        Ok(self.get(idx)?.poses.clone())
    }

    fn load_frames(&self, idx: usize, range: Range<usize>) -> DatasetResult<Vec<RgbImage>> {
        let frames = self.frames(idx)?;
        frames
            .get(range.clone())
            .map(|f| f.to_vec())
            .ok_or_else(|| DatasetError::AssetUnavailable {
                id: self.id(idx),
                reason: format!("frames {range:?} out of {}", frames.len()),
            })
    }
}
