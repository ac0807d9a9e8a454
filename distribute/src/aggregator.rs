use std::path::PathBuf;

use cc_scattering::{
    binary::{ratio_file::RatioFileWriter, scattering_file::ScatteringFileWriter},
    error::ScatteringError,
    observables::{outcome::EnergyOutcome, s_matrix::ScatteringSummary},
    utility::save_serialize,
};

use crate::{
    comm::Communicator,
    context::WorkerContext,
    error::DistributeError,
    partition::TaskAssignment,
    wire::{self, REQUEST},
};

/// Consumer of the globally ordered outcome stream.
pub trait ResultSink {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError>;

    fn finish(&mut self) -> Result<(), ScatteringError> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        (**self).accept(outcome)
    }

    fn finish(&mut self) -> Result<(), ScatteringError> {
        (**self).finish()
    }
}

/// Keeps every outcome in memory.
#[derive(Default)]
pub struct OutcomeCollector {
    pub outcomes: Vec<EnergyOutcome>,
}

impl ResultSink for OutcomeCollector {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        self.outcomes.push(outcome.clone());

        Ok(())
    }
}

impl ResultSink for RatioFileWriter {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        self.write(outcome.index, outcome.energy, outcome.ratio.as_ref())
    }

    fn finish(&mut self) -> Result<(), ScatteringError> {
        RatioFileWriter::finish(self)
    }
}

impl ResultSink for ScatteringFileWriter {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        self.write(outcome)
    }

    fn finish(&mut self) -> Result<(), ScatteringError> {
        ScatteringFileWriter::finish(self)
    }
}

/// Collects transition probabilities and saves them as json once the stream ends.
pub struct SummarySink {
    path: PathBuf,
    summaries: Vec<ScatteringSummary>,
}

impl SummarySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            summaries: Vec::new(),
        }
    }

    pub fn summaries(&self) -> &[ScatteringSummary] {
        &self.summaries
    }
}

impl ResultSink for SummarySink {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        self.summaries.push(outcome.summary());

        Ok(())
    }

    fn finish(&mut self) -> Result<(), ScatteringError> {
        save_serialize(&self.path, &self.summaries)
    }
}

pub struct FanOut<'a> {
    sinks: Vec<&'a mut dyn ResultSink>,
}

impl<'a> FanOut<'a> {
    pub fn new(sinks: Vec<&'a mut dyn ResultSink>) -> Self {
        Self { sinks }
    }
}

impl ResultSink for FanOut<'_> {
    fn accept(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        for sink in self.sinks.iter_mut() {
            sink.accept(outcome)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), ScatteringError> {
        for sink in self.sinks.iter_mut() {
            sink.finish()?;
        }

        Ok(())
    }
}

fn check_outcomes(
    rank: usize,
    assignment: &TaskAssignment,
    outcomes: &[EnergyOutcome],
) -> Result<(), DistributeError> {
    if outcomes.len() != assignment.len() {
        return Err(DistributeError::protocol(
            rank,
            format!(
                "holds {} outcomes for {} assigned tasks",
                outcomes.len(),
                assignment.len()
            ),
        ));
    }

    for (outcome, index) in outcomes.iter().zip(assignment.indices()) {
        if outcome.index != index {
            return Err(DistributeError::protocol(
                rank,
                format!("outcome of task {} where task {index} was expected", outcome.index),
            ));
        }
    }

    Ok(())
}

/// Non coordinator side of the gather: waits for the request, then sends
/// the block header, the block records and the extra record.
pub fn send_results(
    comm: &impl Communicator,
    total_tasks: usize,
    outcomes: &[EnergyOutcome],
) -> Result<(), DistributeError> {
    let context = comm.context();
    let assignment = TaskAssignment::for_rank(total_tasks, context);
    check_outcomes(context.rank, &assignment, outcomes)?;

    let request = wire::decode_u64s(&comm.recv(WorkerContext::COORDINATOR)?)?;
    if request != [REQUEST] {
        return Err(DistributeError::protocol(
            context.rank,
            format!("expected a request frame, got {request:?}"),
        ));
    }

    let header = [assignment.block_len() as u64, assignment.wire_extra()];
    comm.send(WorkerContext::COORDINATOR, wire::encode_u64s(&header))?;

    for outcome in outcomes {
        let (indices, values) = wire::encode_outcome(outcome);
        comm.send(WorkerContext::COORDINATOR, indices)?;
        comm.send(WorkerContext::COORDINATOR, values)?;
    }
    tracing::debug!(rank = context.rank, records = outcomes.len(), "results sent");

    Ok(())
}

fn receive_outcome(
    comm: &impl Communicator,
    peer: usize,
    channels: usize,
    expected: usize,
) -> Result<EnergyOutcome, DistributeError> {
    let indices = comm.recv(peer)?;
    let values = comm.recv(peer)?;
    let outcome = wire::decode_outcome(&indices, &values, channels)?;

    if outcome.index != expected {
        return Err(DistributeError::protocol(
            comm.rank(),
            format!(
                "rank {peer} sent task {} where task {expected} was expected",
                outcome.index
            ),
        ));
    }

    Ok(outcome)
}

/// Coordinator side of the gather.
///
/// Emits its own block, then asks every other rank in turn for its block,
/// blocking on each reply. Extra tasks are held back and emitted last in rank order,
/// so the sink sees strictly increasing task indices.
pub fn collect_results(
    comm: &impl Communicator,
    total_tasks: usize,
    channels: usize,
    outcomes: Vec<EnergyOutcome>,
    sink: &mut impl ResultSink,
) -> Result<(), DistributeError> {
    let context = comm.context();
    if !context.is_coordinator() {
        return Err(DistributeError::protocol(
            context.rank,
            "only the coordinator collects results",
        ));
    }

    let own = TaskAssignment::for_rank(total_tasks, context);
    check_outcomes(context.rank, &own, &outcomes)?;

    let mut extras = Vec::new();
    for outcome in outcomes {
        if Some(outcome.index) == own.extra {
            extras.push(outcome);
        } else {
            sink.accept(&outcome)?;
        }
    }

    for peer in WorkerContext::world(context.world_size).skip(1) {
        let expected = TaskAssignment::for_rank(total_tasks, peer);

        comm.send(peer.rank, wire::encode_u64s(&[REQUEST]))?;
        let header = wire::decode_u64s(&comm.recv(peer.rank)?)?;
        let &[block_len, wire_extra] = header.as_slice() else {
            return Err(DistributeError::protocol(
                context.rank,
                format!("rank {} sent a header of {} elements", peer.rank, header.len()),
            ));
        };

        if block_len as usize != expected.block_len() || wire_extra != expected.wire_extra() {
            return Err(DistributeError::protocol(
                context.rank,
                format!(
                    "rank {} reports block {block_len} with extra {wire_extra}, expected {} with {}",
                    peer.rank,
                    expected.block_len(),
                    expected.wire_extra()
                ),
            ));
        }

        for index in expected.block.clone() {
            let outcome = receive_outcome(comm, peer.rank, channels, index)?;
            sink.accept(&outcome)?;
        }

        if let Some(index) = wire::decode_task_index(wire_extra) {
            extras.push(receive_outcome(comm, peer.rank, channels, index)?);
        }
        tracing::debug!(rank = peer.rank, "results collected");
    }

    for outcome in &extras {
        sink.accept(outcome)?;
    }
    sink.finish()?;

    tracing::info!(records = total_tasks, workers = context.world_size, "results gathered");

    Ok(())
}
