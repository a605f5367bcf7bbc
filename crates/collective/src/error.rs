use std::time::Duration;
use thiserror::Error;

pub type CollectiveResult<T> = Result<T, CollectiveError>;

#[derive(Debug, Error)]
pub enum CollectiveError {
    #[error("collective {op} timed out after {waited:?} waiting for rank {rank}")]
    Timeout {
        rank: usize,
        op: &'static str,
        waited: Duration,
    },
    #[error("rank {rank} disconnected during {op}")]
    PeerDisconnected { rank: usize, op: &'static str },
    #[error("rank {rank} is out of step: {detail}")]
    Desync { rank: usize, detail: String },
    #[error("rendezvous failed: {0}")]
    Rendezvous(String),
    #[error("malformed frame from rank {rank}: {detail}")]
    Protocol { rank: usize, detail: String },
    #[error("tensor conversion failed: {0}")]
    Tensor(String),
    #[error("worker {rank} exited with {status}")]
    WorkerFailed { rank: usize, status: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectiveError {
    /// Rank blamed for the failure, when there is one.
    pub fn rank(&self) -> Option<usize> {
        match self {
            CollectiveError::Timeout { rank, .. }
            | CollectiveError::PeerDisconnected { rank, .. }
            | CollectiveError::Desync { rank, .. }
            | CollectiveError::Protocol { rank, .. }
            | CollectiveError::WorkerFailed { rank, .. } => Some(*rank),
            _ => None,
        }
    }
}
