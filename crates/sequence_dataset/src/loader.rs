//! Sharded, prefetching batch loader.
//!
//! A producer thread walks this rank's shard for the epoch, decodes each batch's samples
//! in parallel on a bounded rayon pool, and hands finished host batches to the trainer
//! through a bounded crossbeam channel.

use crate::batch::{collate, SequenceBatch};
use crate::preprocess::FrameTransform;
use crate::sample::load_with_replacement;
use crate::shard::ShardPlan;
use crate::source::SequenceSource;
use crate::types::{DatasetConfig, DatasetError, DatasetResult};
use crossbeam_channel::{bounded, Receiver};
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Decode threads.
    pub num_workers: usize,
    /// Finished batches buffered ahead of the trainer.
    pub prefetch: usize,
    /// Emit a progress line every N batches (0 disables).
    pub log_every: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 8,
            prefetch: 2,
            log_every: 50,
        }
    }
}

pub struct SequenceLoader {
    source: Arc<dyn SequenceSource>,
    cfg: DatasetConfig,
    loader: LoaderConfig,
    plan: ShardPlan,
    transform: FrameTransform,
    pool: Arc<rayon::ThreadPool>,
}

impl SequenceLoader {
    pub fn new(
        source: Arc<dyn SequenceSource>,
        cfg: DatasetConfig,
        loader: LoaderConfig,
        plan: ShardPlan,
    ) -> DatasetResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(loader.num_workers.max(1))
            .thread_name(|i| format!("seq-loader-{i}"))
            .build()
            .map_err(|e| DatasetError::Other(format!("failed to build loader pool: {e}")))?;
        let transform = FrameTransform::from_config(&cfg);
        Ok(Self {
            source,
            cfg,
            loader,
            plan,
            transform,
            pool: Arc::new(pool),
        })
    }

    pub fn dataset_len(&self) -> usize {
        self.source.len()
    }

    pub fn dataset_config(&self) -> &DatasetConfig {
        &self.cfg
    }

    pub fn plan(&self) -> &ShardPlan {
        &self.plan
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.plan
            .num_samples(self.source.len())
            .div_ceil(self.loader.batch_size.max(1))
    }

    /// Start producing this rank's batches for `epoch`.
    pub fn epoch(&self, epoch: usize) -> EpochIter {
        let indices = self.plan.indices(self.source.len(), epoch);
        let (tx, rx) = bounded(self.loader.prefetch.max(1));
        let source = Arc::clone(&self.source);
        let pool = Arc::clone(&self.pool);
        let cfg = self.cfg.clone();
        let transform = self.transform;
        let loader = self.loader;
        let rank = self.plan.rank;

        let handle = thread::Builder::new()
            .name(format!("seq-prefetch-r{rank}"))
            .spawn(move || {
                let started = Instant::now();
                let mut stats = EpochStats::default();
                let batch_size = loader.batch_size.max(1);
                for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
                    let base = batch_idx * batch_size;
                    let loaded: Vec<DatasetResult<Option<_>>> = pool.install(|| {
                        chunk
                            .par_iter()
                            .enumerate()
                            .map(|(i, &idx)| {
                                let seed = sample_seed(cfg.seed, epoch, rank, base + i);
                                let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                                load_with_replacement(
                                    source.as_ref(),
                                    idx,
                                    &cfg,
                                    &transform,
                                    &mut rng,
                                )
                            })
                            .collect()
                    });

                    let mut samples = Vec::with_capacity(chunk.len());
                    let mut fatal = None;
                    for (res, &requested) in loaded.into_iter().zip(chunk) {
                        match res {
                            Ok(Some(sample)) => {
                                if sample.index != requested {
                                    stats.replaced += 1;
                                }
                                samples.push(sample);
                            }
                            Ok(None) => stats.dropped += 1,
                            Err(e) => {
                                fatal = Some(e);
                                break;
                            }
                        }
                    }

                    let item = match fatal {
                        Some(e) => Err(e),
                        None if samples.is_empty() => Err(DatasetError::AssetUnavailable {
                            id: format!("batch {batch_idx}"),
                            reason: "every sample in the batch failed".to_string(),
                        }),
                        None => {
                            stats.samples += samples.len();
                            collate(
                                samples,
                                transform.height as usize,
                                transform.width as usize,
                                cfg.num_pts,
                            )
                        }
                    };
                    let stop = matches!(&item, Err(e) if !e.is_recoverable());
                    stats.batches += 1;
                    if loader.log_every > 0 && stats.batches % loader.log_every == 0 {
                        stats.log(rank, epoch, started);
                    }
                    if tx.send(item).is_err() || stop {
                        break;
                    }
                }
                stats.log(rank, epoch, started);
            });

        match handle {
            Ok(handle) => EpochIter {
                rx: Some(rx),
                handle: Some(handle),
            },
            Err(e) => {
                let (tx, rx) = bounded(1);
                let _ = tx.send(Err(DatasetError::Other(format!(
                    "failed to spawn prefetch thread: {e}"
                ))));
                EpochIter {
                    rx: Some(rx),
                    handle: None,
                }
            }
        }
    }
}

/// Consumer end of one epoch. Dropping it stops the producer.
pub struct EpochIter {
    rx: Option<Receiver<DatasetResult<SequenceBatch>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EpochIter {
    /// `None` once the shard is exhausted.
    pub fn next_batch(&mut self) -> Option<DatasetResult<SequenceBatch>> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Iterator for EpochIter {
    type Item = DatasetResult<SequenceBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

impl Drop for EpochIter {
    fn drop(&mut self) {
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("prefetch thread panicked");
            }
        }
    }
}

#[derive(Default)]
struct EpochStats {
    batches: usize,
    samples: usize,
    replaced: usize,
    dropped: usize,
}

impl EpochStats {
    fn log(&self, rank: usize, epoch: usize, started: Instant) {
        let secs = started.elapsed().as_secs_f32().max(0.001);
        tracing::info!(
            target: "dataset",
            rank,
            epoch,
            batches = self.batches,
            samples = self.samples,
            replaced = self.replaced,
            dropped = self.dropped,
            rate = self.samples as f32 / secs,
            "[dataset] progress"
        );
    }
}

/// Deterministic per-sample seed (splitmix64 over the sample coordinates).
fn sample_seed(seed: u64, epoch: usize, rank: usize, position: usize) -> u64 {
    let mut z = seed
        ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (rank as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (position as u64).wrapping_mul(0x1656_67B1_9E37_79F9);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
