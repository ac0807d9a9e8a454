use std::{
    path::{Path, PathBuf},
    thread,
};

use cc_scattering::{
    binary::{potential_file::PotentialFileReader, ratio_file::RatioFileReader},
    boundary::BoundaryMatcher,
    channels::ChannelBasis,
    error::ScatteringError,
    grid::EnergyRange,
    observables::outcome::EnergyOutcome,
    potential::GridPotentialSource,
    propagator::EnergyTask,
    sweep::Sweep,
    sweep_watcher::SweepLogging,
};

use crate::{
    aggregator::{ResultSink, collect_results, send_results},
    comm::{Communicator, LocalWorld},
    context::WorkerContext,
    error::DistributeError,
    partition::TaskAssignment,
    process::ProcessWorld,
};

/// Everything a worker needs to compute its share of the energies.
#[derive(Clone, Debug)]
pub struct Job {
    pub potential: PathBuf,
    pub basis: ChannelBasis,
    pub energies: EnergyRange,
    pub parallel: bool,
    pub progress: bool,
}

impl Job {
    pub fn total_tasks(&self) -> usize {
        self.energies.len()
    }
}

/// Sweeps the grid for the energies assigned to `context` and matches every final ratio.
pub fn compute_assigned(job: &Job, context: WorkerContext) -> Result<Vec<EnergyOutcome>, DistributeError> {
    let assignment = TaskAssignment::for_rank(job.total_tasks(), context);
    if assignment.is_empty() {
        tracing::debug!("no tasks assigned");
        return Ok(Vec::new());
    }

    let mut source = PotentialFileReader::open(&job.potential)?;
    let channels = source.channel_count();
    if job.basis.len() != channels {
        return Err(ScatteringError::DimensionMismatch {
            context: "channel basis vs potential file",
            expected: channels,
            actual: job.basis.len(),
        }
        .into());
    }

    let mut tasks: Vec<EnergyTask> = assignment
        .indices()
        .map(|index| EnergyTask::new(index, job.energies.value(index), channels))
        .collect();

    let mut logging = SweepLogging::new(
        format!("rank {}", context.rank),
        job.progress && context.is_coordinator(),
    );
    Sweep::new(job.parallel).run(&mut source, &mut tasks, &mut logging)?;

    let matcher = BoundaryMatcher::from_grid(source.reduced_mass(), &source.grid());
    let outcomes = tasks
        .into_iter()
        .map(|task| {
            let (index, energy) = (task.index, task.energy);
            EnergyOutcome::compute(index, energy, task.into_ratio(), &matcher, &job.basis)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(outcomes)
}

/// Computes this rank's outcomes and takes part in the ordered gather.
/// Only the coordinator writes to `sink`.
pub fn run_worker(
    comm: &impl Communicator,
    job: &Job,
    sink: Option<&mut dyn ResultSink>,
) -> Result<(), DistributeError> {
    let context = comm.context();
    let _span = tracing::info_span!("worker", rank = context.rank).entered();

    let outcomes = compute_assigned(job, context)?;
    let channels = job.basis.len();

    match (context.is_coordinator(), sink) {
        (true, Some(mut sink)) => {
            collect_results(comm, job.total_tasks(), channels, outcomes, &mut sink)
        }
        (true, None) => Err(DistributeError::protocol(context.rank, "coordinator has no result sink")),
        (false, _) => send_results(comm, job.total_tasks(), &outcomes),
    }
}

/// Runs `world_size` workers as threads of this process.
///
/// Any failing worker fails the whole run. When several workers report errors
/// the one that did not merely observe a closed channel is returned.
pub fn run_local(job: &Job, world_size: usize, sink: &mut dyn ResultSink) -> Result<(), DistributeError> {
    let mut endpoints = LocalWorld::new(world_size).into_iter();
    let coordinator = endpoints.next().ok_or(DistributeError::InvalidWorld {
        rank: WorkerContext::COORDINATOR,
        world_size,
    })?;

    tracing::info!(
        workers = world_size,
        energies = job.total_tasks(),
        "starting distributed propagation"
    );

    let results = thread::scope(|s| {
        let handles: Vec<_> = endpoints
            .map(|endpoint| {
                let rank = endpoint.rank();
                (rank, s.spawn(move || run_worker(&endpoint, job, None)))
            })
            .collect();

        let mut results = vec![(
            WorkerContext::COORDINATOR,
            run_worker(&coordinator, job, Some(sink)),
        )];
        // releases the workers still waiting for a request
        drop(coordinator);

        for (rank, handle) in handles {
            let result = handle
                .join()
                .unwrap_or(Err(DistributeError::WorkerPanic { rank }));
            results.push((rank, result));
        }

        results
    });

    root_cause(results)
}

/// Runs the coordinator in this process and every other rank as a child process of `program`.
///
/// `handshake` is the first message of every child. When the coordinator fails,
/// children still computing are stopped.
pub fn run_processes(
    program: &Path,
    handshake: &[u8],
    job: &Job,
    world_size: usize,
    sink: &mut dyn ResultSink,
) -> Result<(), DistributeError> {
    let world = ProcessWorld::spawn(program, world_size, handshake)?;

    tracing::info!(
        workers = world_size,
        energies = job.total_tasks(),
        program = %program.display(),
        "starting worker processes"
    );

    let coordinator = run_worker(&world, job, Some(sink));
    let stop = coordinator.is_err();

    let mut results = vec![(WorkerContext::COORDINATOR, coordinator)];
    results.extend(world.finish(stop));

    root_cause(results)
}

fn root_cause(results: Vec<(usize, Result<(), DistributeError>)>) -> Result<(), DistributeError> {
    let mut secondary = None;
    let mut primary = None;

    for (rank, result) in results {
        let Err(error) = result else { continue };
        tracing::error!(rank, %error, "worker failed");

        if error.is_secondary() {
            secondary.get_or_insert(error);
        } else {
            primary.get_or_insert(error);
        }
    }

    match primary.or(secondary) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Matches every record of a stored ratio file against `basis`.
pub fn rematch(
    ratio_path: impl AsRef<Path>,
    basis: &ChannelBasis,
    sink: &mut dyn ResultSink,
) -> Result<usize, DistributeError> {
    let reader = RatioFileReader::open(ratio_path)?;
    let header = reader.header();
    if header.channels != basis.len() {
        return Err(ScatteringError::DimensionMismatch {
            context: "channel basis vs ratio file",
            expected: header.channels,
            actual: basis.len(),
        }
        .into());
    }

    let matcher = BoundaryMatcher::from_grid(header.mass, &header.grid);
    let mut count = 0;
    for record in reader {
        let record = record?;
        let outcome = EnergyOutcome::compute(record.index, record.energy, record.ratio, &matcher, basis)?;
        sink.accept(&outcome)?;
        count += 1;
    }
    sink.finish()?;

    tracing::info!(records = count, "ratio file matched");

    Ok(count)
}

#[cfg(test)]
mod test {
    use cc_scattering::{
        binary::potential_file::write_potential,
        channels::{Channel, ChannelBasis},
        faer::MatMut,
        grid::GridRange,
        potential::FunctionPotential,
    };

    use crate::{
        aggregator::OutcomeCollector,
        context::WorkerContext,
        error::{DISCONNECTED_EXIT_CODE, DistributeError},
    };

    use super::{Job, compute_assigned, root_cause, run_local};

    fn single_channel(threshold: f64) -> ChannelBasis {
        ChannelBasis::new(vec![Channel {
            total_j: 0,
            j: 0,
            v: 0,
            l: 0,
            parity: 1,
            index: 0,
            threshold,
        }])
    }

    fn job(dir: &std::path::Path, basis: ChannelBasis) -> Job {
        let path = dir.join("potential.bin");
        let potential = |r: f64, mut out: MatMut<f64>| out[(0, 0)] = 0.5 * f64::exp(-r);
        let mut source = FunctionPotential::new(1., GridRange::new(1., 12., 0.01), 1, potential);
        write_potential(&path, &mut source).unwrap();

        Job {
            potential: path,
            basis,
            energies: GridRange::new(0.1, 0.7, 0.1),
            parallel: false,
            progress: false,
        }
    }

    #[test]
    fn test_local_run() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), single_channel(0.));

        let mut collector = OutcomeCollector::default();
        run_local(&job, 3, &mut collector).unwrap();

        let indices: Vec<_> = collector.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());

        let single = compute_assigned(&job, WorkerContext::new(0, 1).unwrap()).unwrap();
        for (gathered, alone) in collector.outcomes.iter().zip(&single) {
            assert_eq!(gathered.ratio, alone.ratio);
            assert_eq!(gathered.reaction.full, alone.reaction.full);
        }
    }

    #[test]
    fn test_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), single_channel(0.));
        job.basis = ChannelBasis::new(vec![]);

        let mut collector = OutcomeCollector::default();
        let error = run_local(&job, 3, &mut collector).unwrap_err();
        assert!(matches!(error, DistributeError::Scattering(_)));

        let error = run_local(&job, 0, &mut collector).unwrap_err();
        assert!(matches!(error, DistributeError::InvalidWorld { .. }));
    }

    #[test]
    fn test_root_cause() {
        let results = vec![
            (0, Err(DistributeError::Disconnected { rank: 0, peer: 2 })),
            (1, Ok(())),
            (2, Err(DistributeError::WorkerPanic { rank: 2 })),
        ];
        assert!(matches!(root_cause(results), Err(DistributeError::WorkerPanic { rank: 2 })));

        let results = vec![(0, Ok(())), (1, Err(DistributeError::Disconnected { rank: 1, peer: 0 }))];
        assert!(root_cause(results).unwrap_err().is_secondary());

        let results = vec![
            (0, Err(DistributeError::Disconnected { rank: 0, peer: 1 })),
            (1, Err(DistributeError::WorkerExit { rank: 1, code: Some(DISCONNECTED_EXIT_CODE.into()) })),
            (2, Err(DistributeError::WorkerExit { rank: 2, code: Some(1) })),
            (3, Err(DistributeError::WorkerStopped { rank: 3 })),
        ];
        assert!(matches!(
            root_cause(results),
            Err(DistributeError::WorkerExit { rank: 2, code: Some(1) })
        ));
    }
}
