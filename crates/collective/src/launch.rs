//! Spawn one worker process per rank on this host and supervise them.

use crate::context::{ENV_MASTER_ADDR, ENV_MASTER_PORT, ENV_RANK, ENV_WORLD_SIZE};
use crate::error::{CollectiveError, CollectiveResult};
use std::ffi::OsString;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub world_size: usize,
    pub master_addr: String,
    /// `None` picks a free port.
    pub master_port: Option<u16>,
    pub poll_interval: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            world_size: 1,
            master_addr: crate::context::DEFAULT_MASTER_ADDR.to_string(),
            master_port: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Ask the OS for an unused port on `addr`.
pub fn free_port(addr: &str) -> std::io::Result<u16> {
    let listener = TcpListener::bind((addr, 0))?;
    Ok(listener.local_addr()?.port())
}

fn kill_all(children: &mut [Option<Child>]) {
    for (rank, slot) in children.iter_mut().enumerate() {
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(rank, "kill failed: {e}");
            }
            let _ = child.wait();
        }
    }
}

/// Run `program args...` once per rank with the rendezvous env set, and wait for all
/// of them. If any worker exits unsuccessfully the survivors are killed.
pub fn launch(program: &Path, args: &[OsString], cfg: &LaunchConfig) -> CollectiveResult<()> {
    let world_size = cfg.world_size.max(1);
    let port = match cfg.master_port {
        Some(port) => port,
        None => free_port(&cfg.master_addr)?,
    };
    tracing::info!(
        world_size,
        addr = %cfg.master_addr,
        port,
        "launching workers"
    );

    let mut children: Vec<Option<Child>> = Vec::with_capacity(world_size);
    for rank in 0..world_size {
        let spawned = Command::new(program)
            .args(args)
            .env(ENV_MASTER_ADDR, &cfg.master_addr)
            .env(ENV_MASTER_PORT, port.to_string())
            .env(ENV_RANK, rank.to_string())
            .env(ENV_WORLD_SIZE, world_size.to_string())
            .spawn();
        match spawned {
            Ok(child) => children.push(Some(child)),
            Err(e) => {
                kill_all(&mut children);
                return Err(e.into());
            }
        }
    }

    let mut running = world_size;
    while running > 0 {
        for rank in 0..world_size {
            let Some(child) = children[rank].as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    tracing::info!(rank, "worker finished");
                    children[rank] = None;
                    running -= 1;
                }
                Ok(Some(status)) => {
                    tracing::error!(rank, %status, "worker failed; stopping the others");
                    children[rank] = None;
                    kill_all(&mut children);
                    return Err(CollectiveError::WorkerFailed {
                        rank,
                        status: status.to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    kill_all(&mut children);
                    return Err(e.into());
                }
            }
        }
        if running > 0 {
            thread::sleep(cfg.poll_interval);
        }
    }
    Ok(())
}
