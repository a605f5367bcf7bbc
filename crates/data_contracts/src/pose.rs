use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Allowed deviation of a quaternion norm from 1.0 before a log is rejected.
pub const UNIT_QUATERNION_TOLERANCE: f64 = 1e-3;

/// One global pose sample: ECEF-like position and a unit quaternion `[w, x, y, z]`
/// rotating vehicle-frame vectors into the global frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

impl PoseRecord {
    pub fn new(position: [f64; 3], orientation: [f64; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

/// On-disk pose log for one sequence (`global_pose.json`), one entry per video frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoseLog {
    pub frame_positions: Vec<[f64; 3]>,
    pub frame_orientations: Vec<[f64; 4]>,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("pose log has {positions} positions but {orientations} orientations")]
    LengthMismatch {
        positions: usize,
        orientations: usize,
    },
    #[error("non-finite pose at frame {frame}")]
    NonFinite { frame: usize },
    #[error("orientation at frame {frame} is not a unit quaternion (norm {norm:.6})")]
    NonUnitQuaternion { frame: usize, norm: f64 },
}

impl PoseLog {
    pub fn len(&self) -> usize {
        self.frame_positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_positions.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = PoseRecord> + '_ {
        self.frame_positions
            .iter()
            .zip(&self.frame_orientations)
            .map(|(p, q)| PoseRecord::new(*p, *q))
    }

    pub fn from_records(records: &[PoseRecord]) -> Self {
        Self {
            frame_positions: records.iter().map(|r| r.position).collect(),
            frame_orientations: records.iter().map(|r| r.orientation).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.frame_positions.len() != self.frame_orientations.len() {
            return Err(ContractError::LengthMismatch {
                positions: self.frame_positions.len(),
                orientations: self.frame_orientations.len(),
            });
        }
        for (frame, (p, q)) in self
            .frame_positions
            .iter()
            .zip(&self.frame_orientations)
            .enumerate()
        {
            if p.iter().chain(q.iter()).any(|v| !v.is_finite()) {
                return Err(ContractError::NonFinite { frame });
            }
            let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
            if (norm - 1.0).abs() > UNIT_QUATERNION_TOLERANCE {
                return Err(ContractError::NonUnitQuaternion { frame, norm });
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = std::fs::read(path).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| ContractError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ContractError> {
        let data = serde_json::to_vec(self).map_err(|e| ContractError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, data).map_err(|e| ContractError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
