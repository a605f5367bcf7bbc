//! Burn models for recurrent trajectory planning.
//!
//! - `RecurrentPredictor`: the stepping interface the training loop drives.
//! - `SequencePlanner`: conv frame-pair encoder + stacked GRU + mode/trajectory heads.
//! - `StepLoss` / `TrajectoryLoss`: winner-take-all multi-modal trajectory loss.
//! - `metrics`: host-side displacement errors for validation.

pub mod loss;
pub mod metrics;
pub mod planner;
pub mod predictor;

pub use loss::{StepLoss, StepLossOutput, TrajectoryLoss};
pub use metrics::{displacement_errors, displacement_errors_host, DisplacementErrors};
pub use planner::{GruCell, SequencePlanner, SequencePlannerConfig};
pub use predictor::{Prediction, RecurrentPredictor};

pub mod prelude {
    pub use super::{
        Prediction, RecurrentPredictor, SequencePlanner, SequencePlannerConfig, StepLoss,
        TrajectoryLoss,
    };
}
