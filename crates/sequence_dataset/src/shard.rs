//! Rank-striped dataset sharding.
//!
//! Every rank shuffles the full index list with the same epoch-derived seed, so all
//! ranks agree on the permutation without exchanging it, then takes every
//! `world_size`-th element starting at its rank.

use rand::{seq::SliceRandom, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub rank: usize,
    pub world_size: usize,
    pub shuffle: bool,
    /// Drop the tail so every rank owns `len / world_size` items; otherwise pad by
    /// wrapping around to `ceil(len / world_size)`.
    pub drop_last: bool,
    pub seed: u64,
}

impl ShardPlan {
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size: world_size.max(1),
            shuffle: true,
            drop_last: true,
            seed: 0,
        }
    }

    /// Unshuffled single-rank plan covering the whole dataset.
    pub fn full() -> Self {
        Self {
            shuffle: false,
            drop_last: false,
            ..Self::new(0, 1)
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Items owned by each rank.
    pub fn num_samples(&self, dataset_len: usize) -> usize {
        if self.drop_last {
            dataset_len / self.world_size
        } else {
            dataset_len.div_ceil(self.world_size)
        }
    }

    /// Dataset indices owned by this rank for `epoch`.
    pub fn indices(&self, dataset_len: usize, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..dataset_len).collect();
        if self.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        let per_rank = self.num_samples(dataset_len);
        let total = per_rank * self.world_size;
        if self.drop_last {
            order.truncate(total);
        } else if !order.is_empty() {
            let mut i = 0;
            while order.len() < total {
                order.push(order[i]);
                i += 1;
            }
        }
        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}
