//! Global pose log to egocentric future-trajectory labels.
//!
//! The pose log stores, per frame, a global position and the quaternion that rotates
//! vehicle-frame vectors into the global frame (`ecef_from_local`). For an anchor frame
//! `i` the global-to-local matrix is the transpose of that rotation, and every future
//! point `k` is `R_i^T * (p[i + k] - p[i])`. Point 0 is therefore always the origin.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

/// `num_pts` future positions expressed in the anchor's local frame.
pub type LocalTrajectory = Vec<Vector3<f64>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalizeError {
    #[error("pose log has {positions} positions but {orientations} orientations")]
    PoseLengthMismatch {
        positions: usize,
        orientations: usize,
    },
    #[error("anchor {anchor} needs {num_pts} future samples but only {available} remain")]
    InsufficientHorizon {
        anchor: usize,
        num_pts: usize,
        available: usize,
    },
}

/// Standard quaternion-to-rotation-matrix conversion for `[w, x, y, z]`.
/// No renormalization: callers supply unit quaternions.
pub fn rotation_from_quaternion(q: [f64; 4]) -> Matrix3<f64> {
    UnitQuaternion::new_unchecked(Quaternion::new(q[0], q[1], q[2], q[3]))
        .to_rotation_matrix()
        .into_inner()
}

fn check_lengths(positions: &[[f64; 3]], orientations: &[[f64; 4]]) -> Result<(), LocalizeError> {
    if positions.len() != orientations.len() {
        return Err(LocalizeError::PoseLengthMismatch {
            positions: positions.len(),
            orientations: orientations.len(),
        });
    }
    Ok(())
}

/// Local trajectory for a single anchor index.
pub fn localize_anchor(
    positions: &[[f64; 3]],
    orientations: &[[f64; 4]],
    anchor: usize,
    num_pts: usize,
) -> Result<LocalTrajectory, LocalizeError> {
    check_lengths(positions, orientations)?;
    let available = positions.len().saturating_sub(anchor);
    if anchor >= positions.len() || available < num_pts {
        return Err(LocalizeError::InsufficientHorizon {
            anchor,
            num_pts,
            available,
        });
    }

    let local_from_global = rotation_from_quaternion(orientations[anchor]).transpose();
    let origin = Vector3::from(positions[anchor]);
    Ok(positions[anchor..anchor + num_pts]
        .iter()
        .map(|p| local_from_global * (Vector3::from(*p) - origin))
        .collect())
}

/// One local trajectory for every anchor `i` with `i + num_pts <= len`.
pub fn localize(
    positions: &[[f64; 3]],
    orientations: &[[f64; 4]],
    num_pts: usize,
) -> Result<Vec<LocalTrajectory>, LocalizeError> {
    check_lengths(positions, orientations)?;
    let anchors = (positions.len() + 1).saturating_sub(num_pts);
    if num_pts == 0 {
        return Ok(vec![Vec::new(); positions.len()]);
    }
    (0..anchors)
        .map(|i| localize_anchor(positions, orientations, i, num_pts))
        .collect()
}

/// Exactly `anchors` trajectories (one per window step); fails if any lacks horizon.
pub fn localize_window(
    positions: &[[f64; 3]],
    orientations: &[[f64; 4]],
    anchors: usize,
    num_pts: usize,
) -> Result<Vec<LocalTrajectory>, LocalizeError> {
    (0..anchors)
        .map(|i| localize_anchor(positions, orientations, i, num_pts))
        .collect()
}

/// Row-major `[anchors, num_pts, 3]` f32 buffer.
pub fn flatten_labels(trajectories: &[LocalTrajectory]) -> Vec<f32> {
    trajectories
        .iter()
        .flat_map(|traj| traj.iter())
        .flat_map(|p| [p.x as f32, p.y as f32, p.z as f32])
        .collect()
}
