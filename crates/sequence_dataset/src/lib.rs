//! Sequence loading for recurrent trajectory training.
//!
//! This crate provides:
//! - Pose localization (global poses to egocentric future-trajectory labels)
//! - Random fixed-length window selection over variable-length sequences
//! - Rank-striped, epoch-reshuffled sharding for distributed training
//! - Frame preprocessing and frame-pair assembly
//! - A prefetching batch loader with a skip-and-replace policy for bad samples

pub mod batch;
pub mod loader;
pub mod localize;
pub mod preprocess;
pub mod sample;
pub mod shard;
pub mod source;
pub mod types;
pub mod window;

pub use batch::{collate, SequenceBatch};
pub use loader::{EpochIter, LoaderConfig, SequenceLoader};
pub use localize::{
    flatten_labels, localize, localize_anchor, localize_window, rotation_from_quaternion,
    LocalTrajectory, LocalizeError,
};
pub use preprocess::FrameTransform;
pub use sample::{load_sample, load_with_replacement, SequenceSample};
pub use shard::ShardPlan;
pub use source::{DirSequenceSource, MemorySequence, MemorySequenceSource, SequenceSource};
pub use types::*;
pub use window::{sample_window, Window, WindowError};
