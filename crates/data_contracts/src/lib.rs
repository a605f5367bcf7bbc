//! Shared data contracts for driving sequences and global pose logs.

pub mod pose;
pub mod split;

pub use pose::{ContractError, PoseLog, PoseRecord};
pub use split::SplitList;
