use collective::CollectiveError;
use sequence_dataset::DatasetError;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Reported through logs and metrics; the boundary is skipped, training continues.
    #[error("non-finite loss on rank {rank} at epoch {epoch} boundary {boundary} (local value {value})")]
    NonFiniteLoss {
        rank: usize,
        epoch: usize,
        boundary: usize,
        value: f32,
    },
    #[error(transparent)]
    Collective(#[from] CollectiveError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("a peer rank hit a fatal data error")]
    PeerDataFailure,
    #[error("checkpoint error at {path}: {reason}")]
    Checkpoint { path: String, reason: String },
    #[error("metrics sink error: {0}")]
    Metrics(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}
