//! The collective interface shared by every process-group implementation.

use crate::error::CollectiveResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    /// Sum divided by the world size.
    Mean,
    Min,
    Max,
}

impl ReduceOp {
    pub(crate) fn code(self) -> u32 {
        match self {
            ReduceOp::Sum => 0,
            ReduceOp::Mean => 1,
            ReduceOp::Min => 2,
            ReduceOp::Max => 3,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => ReduceOp::Sum,
            1 => ReduceOp::Mean,
            2 => ReduceOp::Min,
            3 => ReduceOp::Max,
            _ => return None,
        })
    }

    /// Fold `other` into `acc` element-wise. `Mean` accumulates a sum; see [`finish`](Self::finish).
    pub(crate) fn combine(self, acc: &mut [f32], other: &[f32]) {
        for (a, b) in acc.iter_mut().zip(other) {
            *a = match self {
                ReduceOp::Sum | ReduceOp::Mean => *a + *b,
                ReduceOp::Min => a.min(*b),
                ReduceOp::Max => a.max(*b),
            };
        }
    }

    pub(crate) fn finish(self, acc: &mut [f32], world_size: usize) {
        if self == ReduceOp::Mean {
            let n = world_size.max(1) as f32;
            acc.iter_mut().for_each(|v| *v /= n);
        }
    }
}

/// Blocking collectives over a fixed group of ranks.
///
/// Every rank must issue the same sequence of calls with buffers of the same length.
pub trait Collective: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Reduce `buf` across ranks in place; every rank receives the result.
    fn all_reduce(&mut self, buf: &mut [f32], op: ReduceOp) -> CollectiveResult<()>;

    /// Overwrite `buf` on every rank with `root`'s contents.
    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> CollectiveResult<()>;

    fn barrier(&mut self) -> CollectiveResult<()>;

    /// Release transport resources. Further calls fail.
    fn shutdown(&mut self) {}

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-process group; every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloGroup;

impl Collective for SoloGroup {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce(&mut self, _buf: &mut [f32], _op: ReduceOp) -> CollectiveResult<()> {
        Ok(())
    }

    fn broadcast(&mut self, _buf: &mut [f32], _root: usize) -> CollectiveResult<()> {
        Ok(())
    }

    fn barrier(&mut self) -> CollectiveResult<()> {
        Ok(())
    }
}
