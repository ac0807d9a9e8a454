use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use cc_scattering::{
    binary::{
        basis_file::read_basis,
        potential_file::PotentialFileReader,
        ratio_file::{RatioFileReader, RatioFileWriter, RatioHeader},
        scattering_file::{ScatteringFileWriter, ScatteringHeader},
    },
    error::ScatteringError,
};

use quantum::units::{Au, Energy, Kelvin};

#[cfg(feature = "mpi")]
use crate::mpi_world::MpiWorld;
use crate::{
    aggregator::{FanOut, ResultSink, SummarySink},
    comm::Communicator,
    config::RunConfig,
    context::WorkerContext,
    error::DistributeError,
    process::{PipeEndpoint, current_program},
    worker::{Job, rematch, run_local, run_processes, run_worker},
};

pub const RATIO_FILE: &str = "ratio.bin";
pub const SCATTERING_FILE: &str = "scattering.bin";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Clone, Debug, PartialEq)]
pub struct RunOutputs {
    pub ratio: PathBuf,
    pub scattering: PathBuf,
    pub summary: PathBuf,
}

impl RunOutputs {
    pub fn in_directory(directory: &Path) -> Self {
        Self {
            ratio: directory.join(RATIO_FILE),
            scattering: directory.join(SCATTERING_FILE),
            summary: directory.join(SUMMARY_FILE),
        }
    }
}

/// Where the ranks other than the coordinator run.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerPool {
    /// Child processes started from `program` with the worker subcommand.
    Processes { program: PathBuf },
    /// Threads of this process.
    Threads,
}

impl WorkerPool {
    /// Child processes of the running executable.
    pub fn processes() -> Result<Self, DistributeError> {
        Ok(Self::Processes {
            program: current_program()?,
        })
    }
}

/// Job of `config` with its channel basis loaded.
pub fn load_job(config: &RunConfig) -> Result<Job, DistributeError> {
    Ok(Job {
        potential: config.potential.clone(),
        basis: read_basis(&config.basis)?,
        energies: config.energy_range(),
        parallel: config.parallel,
        progress: config.progress,
    })
}

/// Writers of one run, only moved to their final paths once every outcome was accepted.
struct OutputFiles {
    ratio: RatioFileWriter,
    scattering: ScatteringFileWriter,
    summary: SummarySink,
}

impl OutputFiles {
    fn create(config: &RunConfig, outputs: &RunOutputs) -> Result<Self, DistributeError> {
        let potential = PotentialFileReader::open(&config.potential)?.header();
        let energies = config.energy_range();
        fs::create_dir_all(&config.output).map_err(|e| ScatteringError::io(&config.output, e))?;

        let ratio = RatioFileWriter::create(
            &outputs.ratio,
            RatioHeader {
                channels: potential.channels,
                mass: potential.mass,
                grid: potential.grid,
                energies,
            },
        )?;
        let scattering = ScatteringFileWriter::create(
            &outputs.scattering,
            ScatteringHeader {
                channels: potential.channels,
                mass: potential.mass,
                energies,
            },
        )?;

        Ok(Self {
            ratio,
            scattering,
            summary: SummarySink::new(&outputs.summary),
        })
    }

    fn sink(&mut self) -> FanOut<'_> {
        let sinks: Vec<&mut dyn ResultSink> = vec![&mut self.ratio, &mut self.scattering, &mut self.summary];
        FanOut::new(sinks)
    }
}

fn log_energies(job: &Job) {
    tracing::info!(
        from = %Energy(job.energies.min, Au).to(Kelvin),
        to = %Energy(job.energies.last(), Au).to(Kelvin),
        count = job.energies.len(),
        channels = job.basis.len(),
        "collision energies"
    );
}

/// Propagates every energy of `config` on `pool` and writes the ratio, scattering and summary files.
///
/// A failed run leaves none of the three files behind.
pub fn run_config(config: &RunConfig, pool: &WorkerPool) -> Result<RunOutputs, DistributeError> {
    config.validate()?;

    let job = load_job(config)?;
    log_energies(&job);

    let outputs = RunOutputs::in_directory(&config.output);
    let mut files = OutputFiles::create(config, &outputs)?;
    let mut sink = files.sink();

    match pool {
        WorkerPool::Threads => run_local(&job, config.workers, &mut sink)?,
        WorkerPool::Processes { program } => {
            let handshake = serde_json::to_vec(config)
                .map_err(|e| DistributeError::InvalidConfig(e.to_string()))?;
            run_processes(program, &handshake, &job, config.workers, &mut sink)?
        }
    }

    tracing::info!(output = %config.output.display(), "run finished");

    Ok(outputs)
}

/// Body of a worker process: reads the run configuration sent by the coordinator
/// on `input`, then computes its share and answers on `output`.
pub fn serve_worker(context: WorkerContext, input: impl Read, output: impl Write) -> Result<(), DistributeError> {
    let endpoint = PipeEndpoint::new(context, input, output);

    let handshake = endpoint.recv(WorkerContext::COORDINATOR)?;
    let config: RunConfig = serde_json::from_slice(&handshake).map_err(|e| {
        DistributeError::protocol(context.rank, format!("unreadable run configuration, {e}"))
    })?;
    if config.workers != context.world_size {
        return Err(DistributeError::protocol(
            context.rank,
            format!(
                "run configuration has {} workers in a world of {}",
                config.workers, context.world_size
            ),
        ));
    }

    let job = load_job(&config)?;
    run_worker(&endpoint, &job, None)
}

/// Runs this process as one rank of an `mpirun` launch, rank 0 writes the output files.
///
/// A failing rank aborts the whole launch.
#[cfg(feature = "mpi")]
pub fn run_mpi(config: &RunConfig) -> Result<Option<RunOutputs>, DistributeError> {
    let universe = mpi::initialize().ok_or(DistributeError::MpiInit)?;
    let world = MpiWorld::new(universe.world())?;
    let context = world.context();

    let result = (|| -> Result<Option<RunOutputs>, DistributeError> {
        config.validate()?;
        let job = load_job(config)?;

        if !context.is_coordinator() {
            return run_worker(&world, &job, None).map(|()| None);
        }

        log_energies(&job);
        let outputs = RunOutputs::in_directory(&config.output);
        let mut files = OutputFiles::create(config, &outputs)?;
        run_worker(&world, &job, Some(&mut files.sink()))?;

        Ok(Some(outputs))
    })();

    if let Err(error) = &result {
        tracing::error!(rank = context.rank, %error, "aborting the mpi launch");
        world.abort(1);
    }

    result
}

/// Re-matches a stored ratio file, writing a scattering file and its json summary next to it.
pub fn match_files(ratio: &Path, basis: &Path, output: &Path) -> Result<usize, DistributeError> {
    let basis = read_basis(basis)?;
    let header = RatioFileReader::open(ratio)?.header();

    let mut scattering = ScatteringFileWriter::create(
        output,
        ScatteringHeader {
            channels: header.channels,
            mass: header.mass,
            energies: header.energies,
        },
    )?;
    let mut summary = SummarySink::new(output.with_extension("json"));

    let sinks: Vec<&mut dyn ResultSink> = vec![&mut scattering, &mut summary];
    let mut sink = FanOut::new(sinks);
    rematch(ratio, &basis, &mut sink)
}
