//! Process-group configuration and the scoped handle the trainer owns.

use crate::error::{CollectiveError, CollectiveResult};
use crate::group::{Collective, ReduceOp, SoloGroup};
use crate::tcp::TcpGroup;
use std::env;
use std::time::Duration;

pub const ENV_MASTER_ADDR: &str = "MASTER_ADDR";
pub const ENV_MASTER_PORT: &str = "MASTER_PORT";
pub const ENV_RANK: &str = "RANK";
pub const ENV_WORLD_SIZE: &str = "WORLD_SIZE";

pub const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
pub const DEFAULT_MASTER_PORT: u16 = 29500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistConfig {
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
    /// Applies to rendezvous and to every collective call.
    pub timeout: Duration,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            master_port: DEFAULT_MASTER_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> CollectiveResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CollectiveError::Rendezvous(format!("invalid {key}={raw}"))),
        Err(_) => Ok(None),
    }
}

impl DistConfig {
    /// Read `RANK`/`WORLD_SIZE`/`MASTER_ADDR`/`MASTER_PORT`. `None` when `WORLD_SIZE` is unset.
    pub fn from_env(timeout: Duration) -> CollectiveResult<Option<Self>> {
        let Some(world_size) = parse_env::<usize>(ENV_WORLD_SIZE)? else {
            return Ok(None);
        };
        let cfg = Self {
            rank: parse_env(ENV_RANK)?.unwrap_or(0),
            world_size,
            master_addr: env::var(ENV_MASTER_ADDR)
                .unwrap_or_else(|_| DEFAULT_MASTER_ADDR.to_string()),
            master_port: parse_env(ENV_MASTER_PORT)?.unwrap_or(DEFAULT_MASTER_PORT),
            timeout,
        };
        cfg.validate()?;
        Ok(Some(cfg))
    }

    pub fn validate(&self) -> CollectiveResult<()> {
        if self.world_size == 0 {
            return Err(CollectiveError::Rendezvous("world size must be positive".into()));
        }
        if self.rank >= self.world_size {
            return Err(CollectiveError::Rendezvous(format!(
                "rank {} outside world of {}",
                self.rank, self.world_size
            )));
        }
        if self.timeout.is_zero() {
            return Err(CollectiveError::Rendezvous("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Owns the process group for the lifetime of a training run and tears it down on drop,
/// whichever way the run exits.
pub struct DistributedContext {
    group: Box<dyn Collective>,
}

impl DistributedContext {
    pub fn solo() -> Self {
        Self::from_group(SoloGroup)
    }

    pub fn from_group(group: impl Collective + 'static) -> Self {
        Self {
            group: Box::new(group),
        }
    }

    /// Join the TCP group described by `cfg` (a world of one needs no sockets).
    pub fn connect(cfg: &DistConfig) -> CollectiveResult<Self> {
        cfg.validate()?;
        if cfg.world_size == 1 {
            return Ok(Self::solo());
        }
        Ok(Self::from_group(TcpGroup::connect(cfg)?))
    }

    pub fn group(&mut self) -> &mut dyn Collective {
        self.group.as_mut()
    }

    /// All-reduce a single flag; `true` only if it holds on every rank.
    pub fn all_agree(&mut self, flag: bool) -> CollectiveResult<bool> {
        let mut buf = [if flag { 1.0 } else { 0.0 }];
        self.group.all_reduce(&mut buf, ReduceOp::Min)?;
        Ok(buf[0] > 0.5)
    }
}

impl Collective for DistributedContext {
    fn rank(&self) -> usize {
        self.group.rank()
    }

    fn world_size(&self) -> usize {
        self.group.world_size()
    }

    fn all_reduce(&mut self, buf: &mut [f32], op: ReduceOp) -> CollectiveResult<()> {
        self.group.all_reduce(buf, op)
    }

    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> CollectiveResult<()> {
        self.group.broadcast(buf, root)
    }

    fn barrier(&mut self) -> CollectiveResult<()> {
        self.group.barrier()
    }

    fn shutdown(&mut self) {
        self.group.shutdown();
    }
}

impl Drop for DistributedContext {
    fn drop(&mut self) {
        let rank = self.group.rank();
        self.group.shutdown();
        tracing::debug!(rank, "process group torn down");
    }
}
