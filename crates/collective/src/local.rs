//! In-process group: one `LocalGroup` per thread, linked by crossbeam channels.

use crate::error::{CollectiveError, CollectiveResult};
use crate::star::{Frame, StarGroup, Transport};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub struct ChannelTransport {
    to: Vec<Option<Sender<Frame>>>,
    from: Vec<Option<Receiver<Frame>>>,
}

impl ChannelTransport {
    fn unlinked(world_size: usize) -> Self {
        Self {
            to: (0..world_size).map(|_| None).collect(),
            from: (0..world_size).map(|_| None).collect(),
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, peer: usize, frame: &Frame, op: &'static str) -> CollectiveResult<()> {
        let tx = self
            .to
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or(CollectiveError::PeerDisconnected { rank: peer, op })?;
        tx.send(frame.clone())
            .map_err(|_| CollectiveError::PeerDisconnected { rank: peer, op })
    }

    fn recv(
        &mut self,
        peer: usize,
        timeout: Duration,
        op: &'static str,
    ) -> CollectiveResult<Frame> {
        let rx = self
            .from
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or(CollectiveError::PeerDisconnected { rank: peer, op })?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => CollectiveError::Timeout {
                rank: peer,
                op,
                waited: timeout,
            },
            RecvTimeoutError::Disconnected => CollectiveError::PeerDisconnected { rank: peer, op },
        })
    }

    fn close(&mut self) {
        self.to.clear();
        self.from.clear();
    }
}

pub type LocalGroup = StarGroup<ChannelTransport>;

impl StarGroup<ChannelTransport> {
    /// Build a connected group; element `r` is rank `r`. Move each into its own thread.
    pub fn new_group(world_size: usize, timeout: Duration) -> Vec<LocalGroup> {
        let world_size = world_size.max(1);
        let mut hub = ChannelTransport::unlinked(world_size);
        let mut peers = Vec::with_capacity(world_size - 1);
        for peer in 1..world_size {
            let (up_tx, up_rx) = unbounded();
            let (down_tx, down_rx) = unbounded();
            hub.to[peer] = Some(down_tx);
            hub.from[peer] = Some(up_rx);
            let mut transport = ChannelTransport::unlinked(world_size);
            transport.to[0] = Some(up_tx);
            transport.from[0] = Some(down_rx);
            peers.push(StarGroup::new(peer, world_size, timeout, transport));
        }

        let mut group = Vec::with_capacity(world_size);
        group.push(StarGroup::new(0, world_size, timeout, hub));
        group.extend(peers);
        group
    }
}
