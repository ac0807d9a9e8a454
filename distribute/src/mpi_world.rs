//! Ranks launched by `mpirun`, one process per rank, possibly across nodes.

use mpi::{
    Rank,
    topology::SimpleCommunicator,
    traits::{Communicator as _, Destination as _, Source as _},
};

use crate::{comm::Communicator, context::WorkerContext, error::DistributeError};

pub struct MpiWorld {
    context: WorkerContext,
    world: SimpleCommunicator,
}

impl MpiWorld {
    pub fn new(world: SimpleCommunicator) -> Result<Self, DistributeError> {
        let rank = usize::try_from(world.rank()).unwrap_or(usize::MAX);
        let world_size = usize::try_from(world.size()).unwrap_or(0);
        let context = WorkerContext::new(rank, world_size)?;

        Ok(Self { context, world })
    }

    fn peer(&self, peer: usize) -> Result<Rank, DistributeError> {
        Rank::try_from(peer)
            .ok()
            .filter(|_| peer < self.context.world_size && peer != self.context.rank)
            .ok_or_else(|| DistributeError::protocol(self.context.rank, format!("no rank {peer} in the mpi world")))
    }

    /// Tears down every rank of the launch, the other ranks would otherwise
    /// block forever on their next receive.
    pub fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}

impl Communicator for MpiWorld {
    fn context(&self) -> WorkerContext {
        self.context
    }

    fn send(&self, to: usize, frame: Vec<u8>) -> Result<(), DistributeError> {
        let to = self.peer(to)?;
        self.world.process_at_rank(to).send(&frame[..]);

        Ok(())
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, DistributeError> {
        let from = self.peer(from)?;
        let (frame, _status) = self.world.process_at_rank(from).receive_vec::<u8>();

        Ok(frame)
    }
}
