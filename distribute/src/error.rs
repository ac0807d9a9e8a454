use std::path::PathBuf;

use cc_scattering::error::ScatteringError;

/// Exit code of a worker process whose only failure was a closed pipe.
pub const DISCONNECTED_EXIT_CODE: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum DistributeError {
    #[error(transparent)]
    Scattering(#[from] ScatteringError),

    #[error("rank {rank}: channel to rank {peer} is closed, the peer stopped early")]
    Disconnected { rank: usize, peer: usize },

    #[error("rank {rank}: protocol violation, {reason}")]
    Protocol { rank: usize, reason: String },

    #[error("malformed message frame, {reason}")]
    Frame { reason: String },

    #[error("worker {rank} panicked")]
    WorkerPanic { rank: usize },

    #[error("rank {rank}: pipe to rank {peer} failed, {source}")]
    Pipe {
        rank: usize,
        peer: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start worker process {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker process {rank} exited with {}", exit_description(.code))]
    WorkerExit { rank: usize, code: Option<i32> },

    #[error("worker process {rank} was stopped after the run failed")]
    WorkerStopped { rank: usize },

    #[cfg(feature = "mpi")]
    #[error("mpi could not be initialized, it may already be running")]
    MpiInit,

    #[error("invalid worker context: rank {rank} in a world of {world_size}")]
    InvalidWorld { rank: usize, world_size: usize },

    #[error("{path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: invalid run configuration, {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid run configuration, {0}")]
    InvalidConfig(String),
}

impl DistributeError {
    pub(crate) fn protocol(rank: usize, reason: impl Into<String>) -> Self {
        Self::Protocol {
            rank,
            reason: reason.into(),
        }
    }

    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        Self::Frame {
            reason: reason.into(),
        }
    }

    /// Whether this error only reflects a failure that happened on another worker.
    pub fn is_secondary(&self) -> bool {
        match self {
            Self::Disconnected { .. } | Self::WorkerStopped { .. } => true,
            Self::WorkerExit { code, .. } => *code == Some(DISCONNECTED_EXIT_CODE.into()),
            _ => false,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}
