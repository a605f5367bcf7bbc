//! Keep every rank on the same batch schedule.
//!
//! Before each batch the ranks reduce three flags: "my batch is missing", "my shard is
//! exhausted" and "I hit a fatal error". Any exhausted rank ends the epoch for all; a
//! missing batch anywhere is skipped by all; a fatal error anywhere stops everyone.

use crate::error::{TrainError, TrainResult};
use collective::{Collective, ReduceOp};
use sequence_dataset::{EpochIter, SequenceBatch};

#[derive(Debug)]
pub enum Lockstep {
    Batch(Box<SequenceBatch>),
    /// At least one rank has no usable batch this round.
    Skip,
    /// At least one rank ran out of batches.
    Done,
}

pub fn next_in_lockstep(
    iter: &mut EpochIter,
    group: &mut dyn Collective,
    strict: bool,
) -> TrainResult<Lockstep> {
    let mut local_err = None;
    let mut batch = None;
    let mut flags = [0.0f32; 3];
    match iter.next_batch() {
        Some(Ok(b)) => batch = Some(b),
        Some(Err(e)) if e.is_recoverable() && !strict => {
            tracing::warn!(rank = group.rank(), "batch unavailable: {e}");
            flags[0] = 1.0;
        }
        Some(Err(e)) => {
            flags[2] = 1.0;
            local_err = Some(e);
        }
        None => flags[1] = 1.0,
    }
    group.all_reduce(&mut flags, ReduceOp::Max)?;

    if flags[2] > 0.5 {
        return Err(match local_err {
            Some(e) => e.into(),
            None => TrainError::PeerDataFailure,
        });
    }
    if flags[1] > 0.5 {
        return Ok(Lockstep::Done);
    }
    match batch {
        Some(b) if flags[0] < 0.5 => Ok(Lockstep::Batch(Box::new(b))),
        _ => Ok(Lockstep::Skip),
    }
}
