//! Star-topology protocol shared by the in-process and TCP groups.
//!
//! Rank 0 is the hub. For every collective each other rank sends one frame to the hub,
//! the hub folds the contributions in rank order, and sends the result back to all
//! ranks. Frames carry a per-group sequence number so a rank that skipped or reordered
//! a call is reported as out of step instead of silently mixing buffers.

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::{Collective, ReduceOp};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    AllReduce(ReduceOp),
    Broadcast { root: usize },
    Barrier,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::AllReduce(_) => "all_reduce",
            OpKind::Broadcast { .. } => "broadcast",
            OpKind::Barrier => "barrier",
        }
    }

    /// `(tag, argument)` wire encoding.
    pub fn encode(self) -> (u32, u32) {
        match self {
            OpKind::AllReduce(op) => (1, op.code()),
            OpKind::Broadcast { root } => (2, root as u32),
            OpKind::Barrier => (3, 0),
        }
    }

    pub fn decode(tag: u32, arg: u32) -> Option<Self> {
        match tag {
            1 => ReduceOp::from_code(arg).map(OpKind::AllReduce),
            2 => Some(OpKind::Broadcast { root: arg as usize }),
            3 => Some(OpKind::Barrier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub kind: OpKind,
    pub payload: Vec<f32>,
}

/// Point-to-point links between the hub and the other ranks.
pub trait Transport: Send {
    fn send(&mut self, peer: usize, frame: &Frame, op: &'static str) -> CollectiveResult<()>;

    /// Wait at most `timeout` for the next frame from `peer`.
    fn recv(&mut self, peer: usize, timeout: Duration, op: &'static str)
        -> CollectiveResult<Frame>;

    fn close(&mut self) {}
}

pub struct StarGroup<T: Transport> {
    rank: usize,
    world_size: usize,
    seq: u64,
    timeout: Duration,
    transport: T,
    closed: bool,
}

impl<T: Transport> StarGroup<T> {
    pub fn new(rank: usize, world_size: usize, timeout: Duration, transport: T) -> Self {
        Self {
            rank,
            world_size: world_size.max(1),
            seq: 0,
            timeout,
            transport,
            closed: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check(&self, peer: usize, got: &Frame, expected: &Frame) -> CollectiveResult<()> {
        if got.seq != expected.seq || got.kind != expected.kind {
            return Err(CollectiveError::Desync {
                rank: peer,
                detail: format!(
                    "expected {} #{}, got {} #{}",
                    expected.kind.name(),
                    expected.seq,
                    got.kind.name(),
                    got.seq
                ),
            });
        }
        if got.payload.len() != expected.payload.len() {
            return Err(CollectiveError::Desync {
                rank: peer,
                detail: format!(
                    "{} #{} buffer has {} values, expected {}",
                    expected.kind.name(),
                    expected.seq,
                    got.payload.len(),
                    expected.payload.len()
                ),
            });
        }
        Ok(())
    }

    fn exchange(&mut self, kind: OpKind, buf: &mut [f32]) -> CollectiveResult<()> {
        let op = kind.name();
        if self.closed {
            return Err(CollectiveError::PeerDisconnected {
                rank: self.rank,
                op,
            });
        }
        if let OpKind::Broadcast { root } = kind {
            if root >= self.world_size {
                return Err(CollectiveError::Protocol {
                    rank: self.rank,
                    detail: format!("broadcast root {root} outside world of {}", self.world_size),
                });
            }
        }
        if self.world_size == 1 {
            return Ok(());
        }

        self.seq += 1;
        let mine = Frame {
            seq: self.seq,
            kind,
            payload: buf.to_vec(),
        };

        if self.rank != 0 {
            self.transport.send(0, &mine, op)?;
            let reply = self.transport.recv(0, self.timeout, op)?;
            self.check(0, &reply, &mine)?;
            buf.copy_from_slice(&reply.payload);
            return Ok(());
        }

        let deadline = Instant::now() + self.timeout;
        let mut acc = mine.payload.clone();
        for peer in 1..self.world_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let got = match self.transport.recv(peer, remaining, op) {
                Err(CollectiveError::Timeout { rank, op, .. }) => {
                    return Err(CollectiveError::Timeout {
                        rank,
                        op,
                        waited: self.timeout,
                    })
                }
                other => other?,
            };
            self.check(peer, &got, &mine)?;
            match kind {
                OpKind::AllReduce(reduce) => reduce.combine(&mut acc, &got.payload),
                OpKind::Broadcast { root } if root == peer => acc = got.payload,
                _ => {}
            }
        }
        if let OpKind::AllReduce(reduce) = kind {
            reduce.finish(&mut acc, self.world_size);
        }

        let reply = Frame {
            seq: self.seq,
            kind,
            payload: acc,
        };
        for peer in 1..self.world_size {
            self.transport.send(peer, &reply, op)?;
        }
        buf.copy_from_slice(&reply.payload);
        Ok(())
    }
}

impl<T: Transport> Collective for StarGroup<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce(&mut self, buf: &mut [f32], op: ReduceOp) -> CollectiveResult<()> {
        self.exchange(OpKind::AllReduce(op), buf)
    }

    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> CollectiveResult<()> {
        self.exchange(OpKind::Broadcast { root }, buf)
    }

    fn barrier(&mut self) -> CollectiveResult<()> {
        self.exchange(OpKind::Barrier, &mut [])
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
        }
    }
}

impl<T: Transport> Drop for StarGroup<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
