use std::sync::mpsc::{Receiver, Sender, channel};

use crate::{context::WorkerContext, error::DistributeError};

/// Blocking point to point messaging between ranks.
pub trait Communicator {
    fn context(&self) -> WorkerContext;

    fn send(&self, to: usize, frame: Vec<u8>) -> Result<(), DistributeError>;

    fn recv(&self, from: usize) -> Result<Vec<u8>, DistributeError>;

    fn rank(&self) -> usize {
        self.context().rank
    }

    fn world_size(&self) -> usize {
        self.context().world_size
    }
}

/// Ranks living as threads of one process, connected by one channel per ordered pair.
pub struct LocalWorld;

impl LocalWorld {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(world_size: usize) -> Vec<LocalEndpoint> {
        let mut senders: Vec<Vec<Option<Sender<Vec<u8>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }
                let (sender, receiver) = channel();
                senders[from][to] = Some(sender);
                receivers[to][from] = Some(receiver);
            }
        }

        WorkerContext::world(world_size)
            .zip(senders.into_iter().zip(receivers))
            .map(|(context, (senders, receivers))| LocalEndpoint {
                context,
                senders,
                receivers,
            })
            .collect()
    }
}

/// One rank's end of a [`LocalWorld`].
pub struct LocalEndpoint {
    context: WorkerContext,
    senders: Vec<Option<Sender<Vec<u8>>>>,
    receivers: Vec<Option<Receiver<Vec<u8>>>>,
}

impl LocalEndpoint {
    fn peer_check(&self, peer: usize) -> Result<(), DistributeError> {
        if peer >= self.context.world_size || peer == self.context.rank {
            return Err(DistributeError::protocol(
                self.context.rank,
                format!("no channel to rank {peer}"),
            ));
        }

        Ok(())
    }
}

impl Communicator for LocalEndpoint {
    fn context(&self) -> WorkerContext {
        self.context
    }

    fn send(&self, to: usize, frame: Vec<u8>) -> Result<(), DistributeError> {
        self.peer_check(to)?;
        let disconnected = DistributeError::Disconnected {
            rank: self.context.rank,
            peer: to,
        };

        match &self.senders[to] {
            Some(sender) => sender.send(frame).map_err(|_| disconnected),
            None => Err(disconnected),
        }
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>, DistributeError> {
        self.peer_check(from)?;
        let disconnected = DistributeError::Disconnected {
            rank: self.context.rank,
            peer: from,
        };

        match &self.receivers[from] {
            Some(receiver) => receiver.recv().map_err(|_| disconnected),
            None => Err(disconnected),
        }
    }
}
