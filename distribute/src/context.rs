use crate::error::DistributeError;

/// Position of one worker among the cooperating workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub world_size: usize,
}

impl WorkerContext {
    pub const COORDINATOR: usize = 0;

    pub fn new(rank: usize, world_size: usize) -> Result<Self, DistributeError> {
        if world_size == 0 || rank >= world_size {
            return Err(DistributeError::InvalidWorld { rank, world_size });
        }

        Ok(Self { rank, world_size })
    }

    /// Contexts of every rank in a world of `world_size` workers.
    pub fn world(world_size: usize) -> impl Iterator<Item = Self> {
        (0..world_size).map(move |rank| Self { rank, world_size })
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == Self::COORDINATOR
    }
}
