//! Collectives for data-parallel training.
//!
//! - `Collective`: rank-aware all-reduce / broadcast / barrier with timeouts.
//! - `SoloGroup`, `LocalGroup` (threads) and `TcpGroup` (processes) implementations;
//!   the latter two share the star protocol in [`star`].
//! - `DistributedContext`: scoped owner of the group, torn down on drop.
//! - `launch`: spawn and supervise one worker process per rank.
//! - `sync`: gradient all-reduce and module state synchronization for Burn modules.

pub mod context;
pub mod error;
pub mod group;
pub mod launch;
pub mod local;
pub mod star;
pub mod sync;
pub mod tcp;

pub use context::{DistConfig, DistributedContext, DEFAULT_TIMEOUT};
pub use error::{CollectiveError, CollectiveResult};
pub use group::{Collective, ReduceOp, SoloGroup};
pub use launch::{free_port, launch, LaunchConfig};
pub use local::LocalGroup;
pub use sync::{all_reduce_gradients, sync_module_state, StateSync};
pub use tcp::TcpGroup;
