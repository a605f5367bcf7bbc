/// Mutable training position threaded through the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingContext {
    pub rank: usize,
    pub world_size: usize,
    pub seed: u64,
    pub epoch: usize,
    /// Windows (batches) trained this epoch.
    pub window: usize,
    /// Optimizer updates applied over the whole run.
    pub boundary: usize,
    /// Boundaries skipped because some rank saw a non-finite loss.
    pub skipped: usize,
}

impl TrainingContext {
    pub fn new(rank: usize, world_size: usize, seed: u64) -> Self {
        Self {
            rank,
            world_size: world_size.max(1),
            seed,
            ..Default::default()
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.window = 0;
    }
}
