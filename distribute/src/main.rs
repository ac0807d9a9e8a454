use std::{io, path::PathBuf, process::ExitCode};

use anyhow::Context;
use cc_scattering::binary::inspect;
use clap::{Parser, Subcommand};
use distribute::{
    config::RunConfig,
    context::WorkerContext,
    error::{DISCONNECTED_EXIT_CODE, DistributeError},
    run::{WorkerPool, match_files, run_config, serve_worker},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ccprop", about = "Coupled channel ratio propagation and scattering matrices")]
struct Cli {
    /// Log per energy details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Propagate every energy of a json run file
    Run {
        config: PathBuf,
        /// Overrides the worker count of the run file
        #[arg(short, long)]
        workers: Option<usize>,
        /// Show the sweep progress bar
        #[arg(long)]
        progress: bool,
        /// Run the workers as threads of this process instead of child processes
        #[arg(long)]
        threads: bool,
    },
    /// Serve one rank of a run, started by `run` with pipes on stdin and stdout
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        rank: usize,
        #[arg(long)]
        world_size: usize,
    },
    /// Run as one rank of an mpirun launch, the worker count is the mpi world size
    #[cfg(feature = "mpi")]
    Mpi { config: PathBuf },
    /// Match a stored ratio file against a channel basis
    Match {
        ratio: PathBuf,
        basis: PathBuf,
        output: PathBuf,
    },
    /// Print the header of a binary file
    Inspect { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            match error.downcast_ref::<DistributeError>() {
                Some(error) if error.is_secondary() => ExitCode::from(DISCONNECTED_EXIT_CODE),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run {
            config,
            workers,
            progress,
            threads,
        } => {
            let mut run = RunConfig::load(&config)
                .with_context(|| format!("loading run file {}", config.display()))?;
            if let Some(workers) = workers {
                run.workers = workers;
            }
            run.progress |= progress;

            let pool = if threads {
                WorkerPool::Threads
            } else {
                WorkerPool::processes()?
            };
            let outputs = run_config(&run, &pool).context("propagation failed")?;
            println!("{}", outputs.scattering.display());
        }
        Command::Worker { rank, world_size } => {
            let context = WorkerContext::new(rank, world_size)?;
            serve_worker(context, io::stdin().lock(), io::stdout().lock())
                .with_context(|| format!("worker {rank} failed"))?;
        }
        #[cfg(feature = "mpi")]
        Command::Mpi { config } => {
            let run = RunConfig::load(&config)
                .with_context(|| format!("loading run file {}", config.display()))?;
            if let Some(outputs) = distribute::run::run_mpi(&run).context("propagation failed")? {
                println!("{}", outputs.scattering.display());
            }
        }
        Command::Match {
            ratio,
            basis,
            output,
        } => {
            let records = match_files(&ratio, &basis, &output)
                .with_context(|| format!("matching {}", ratio.display()))?;
            println!("{records} records written to {}", output.display());
        }
        Command::Inspect { file } => {
            let header = inspect(&file).with_context(|| format!("inspecting {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&header)?);
        }
    }

    Ok(())
}
