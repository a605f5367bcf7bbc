//! Multi-process group over TCP: every rank holds one socket to the hub (rank 0).
//!
//! Wire format, all little-endian:
//!
//! ```text
//! handshake (peer -> hub): magic u32 | rank u32 | world_size u32
//! frame:                   magic u32 | seq u64 | tag u32 | arg u32 | len u32 | len x f32
//! ```

use crate::context::DistConfig;
use crate::error::{CollectiveError, CollectiveResult};
use crate::star::{Frame, OpKind, StarGroup, Transport};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

const MAGIC: u32 = 0x5354_4152;
const HEADER_LEN: usize = 4 + 8 + 4 + 4 + 4;
/// Largest payload accepted from the wire (floats).
const MAX_FRAME_FLOATS: usize = 1 << 28;
const CONNECT_RETRY: Duration = Duration::from_millis(100);
const ACCEPT_POLL: Duration = Duration::from_millis(10);

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let (tag, arg) = frame.kind.encode();
    let mut out = Vec::with_capacity(HEADER_LEN + frame.payload.len() * 4);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&frame.seq.to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&arg.to_le_bytes());
    out.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    for v in &frame.payload {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}

pub fn read_frame(r: &mut impl Read) -> io::Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    if read_u32(&header, 0) != MAGIC {
        return Err(invalid("bad frame magic".to_string()));
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&header[4..12]);
    let seq = u64::from_le_bytes(seq);
    let (tag, arg) = (read_u32(&header, 12), read_u32(&header, 16));
    let kind =
        OpKind::decode(tag, arg).ok_or_else(|| invalid(format!("unknown op tag {tag}/{arg}")))?;
    let len = read_u32(&header, 20) as usize;
    if len > MAX_FRAME_FLOATS {
        return Err(invalid(format!("frame of {len} floats exceeds limit")));
    }
    let mut body = vec![0u8; len * 4];
    r.read_exact(&mut body)?;
    let payload = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Frame { seq, kind, payload })
}

fn map_io(err: io::Error, peer: usize, op: &'static str, waited: Duration) -> CollectiveError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => CollectiveError::Timeout {
            rank: peer,
            op,
            waited,
        },
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => CollectiveError::PeerDisconnected { rank: peer, op },
        ErrorKind::InvalidData => CollectiveError::Protocol {
            rank: peer,
            detail: err.to_string(),
        },
        _ => CollectiveError::Io(err),
    }
}

pub struct TcpTransport {
    streams: Vec<Option<TcpStream>>,
}

impl TcpTransport {
    fn stream(&mut self, peer: usize, op: &'static str) -> CollectiveResult<&mut TcpStream> {
        self.streams
            .get_mut(peer)
            .and_then(Option::as_mut)
            .ok_or(CollectiveError::PeerDisconnected { rank: peer, op })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, peer: usize, frame: &Frame, op: &'static str) -> CollectiveResult<()> {
        let bytes = encode_frame(frame);
        let stream = self.stream(peer, op)?;
        stream
            .write_all(&bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| map_io(e, peer, op, Duration::ZERO))
    }

    fn recv(
        &mut self,
        peer: usize,
        timeout: Duration,
        op: &'static str,
    ) -> CollectiveResult<Frame> {
        let stream = self.stream(peer, op)?;
        // A zero read timeout is rejected by the OS.
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        read_frame(stream).map_err(|e| map_io(e, peer, op, timeout))
    }

    fn close(&mut self) {
        for stream in self.streams.iter_mut().filter_map(Option::take) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

pub type TcpGroup = StarGroup<TcpTransport>;

impl StarGroup<TcpTransport> {
    /// Rendezvous at `cfg.master_addr:cfg.master_port`; rank 0 listens, the others dial.
    /// Returns once every rank has joined.
    pub fn connect(cfg: &DistConfig) -> CollectiveResult<TcpGroup> {
        cfg.validate()?;
        let deadline = Instant::now() + cfg.timeout;
        let addr = resolve(&cfg.master_addr, cfg.master_port)?;
        let streams = if cfg.rank == 0 {
            accept_peers(addr, cfg.world_size, deadline)?
        } else {
            let mut streams: Vec<Option<TcpStream>> = (0..cfg.world_size).map(|_| None).collect();
            streams[0] = Some(dial_hub(addr, cfg.rank, cfg.world_size, deadline)?);
            streams
        };
        let mut group = StarGroup::new(
            cfg.rank,
            cfg.world_size,
            cfg.timeout,
            TcpTransport { streams },
        );
        crate::group::Collective::barrier(&mut group)?;
        tracing::info!(
            rank = cfg.rank,
            world_size = cfg.world_size,
            %addr,
            "process group ready"
        );
        Ok(group)
    }
}

fn resolve(host: &str, port: u16) -> CollectiveResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CollectiveError::Rendezvous(format!("cannot resolve {host}:{port}")))
}

fn accept_peers(
    addr: SocketAddr,
    world_size: usize,
    deadline: Instant,
) -> CollectiveResult<Vec<Option<TcpStream>>> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let mut streams: Vec<Option<TcpStream>> = (0..world_size).map(|_| None).collect();
    let mut joined = 0;
    while joined + 1 < world_size {
        match listener.accept() {
            Ok((mut stream, from)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;
                let mut hello = [0u8; 12];
                stream.read_exact(&mut hello).map_err(|e| {
                    CollectiveError::Rendezvous(format!("handshake from {from} failed: {e}"))
                })?;
                let (magic, rank, world) = (
                    read_u32(&hello, 0),
                    read_u32(&hello, 4) as usize,
                    read_u32(&hello, 8) as usize,
                );
                if magic != MAGIC || world != world_size || rank == 0 || rank >= world_size {
                    return Err(CollectiveError::Rendezvous(format!(
                        "peer {from} announced rank {rank} of {world} (expected world {world_size})"
                    )));
                }
                if streams[rank].is_some() {
                    return Err(CollectiveError::Rendezvous(format!(
                        "rank {rank} joined twice"
                    )));
                }
                tracing::debug!(rank, %from, "peer joined");
                streams[rank] = Some(stream);
                joined += 1;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    let missing: Vec<usize> = (1..world_size)
                        .filter(|r| streams[*r].is_none())
                        .collect();
                    return Err(CollectiveError::Rendezvous(format!(
                        "ranks {missing:?} did not join before the deadline"
                    )));
                }
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(streams)
}

fn dial_hub(
    addr: SocketAddr,
    rank: usize,
    world_size: usize,
    deadline: Instant,
) -> CollectiveResult<TcpStream> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CollectiveError::Rendezvous(format!(
                "rank {rank} could not reach the hub at {addr}"
            )));
        }
        match TcpStream::connect_timeout(&addr, remaining.min(Duration::from_secs(1))) {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                let mut hello = Vec::with_capacity(12);
                hello.extend_from_slice(&MAGIC.to_le_bytes());
                hello.extend_from_slice(&(rank as u32).to_le_bytes());
                hello.extend_from_slice(&(world_size as u32).to_le_bytes());
                stream.write_all(&hello)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(rank, %addr, "hub not reachable yet: {e}");
                thread::sleep(CONNECT_RETRY);
            }
        }
    }
}
