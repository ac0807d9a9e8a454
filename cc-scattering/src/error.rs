use std::path::PathBuf;

/// Failures of the dense linear algebra behind every propagation,
/// matching and scattering-matrix step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    /// `pivot` is 1-based, like the info code of a LAPACK factorization.
    #[error("{operation}: matrix is singular, zero pivot at position {pivot}")]
    Singular { operation: &'static str, pivot: usize },

    #[error("{operation}: result contains non-finite values")]
    NonFinite { operation: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("{path}: wrong format tag, expected {expected:?}, found {actual:?}")]
    BadMagic {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{path}: unsupported format version, expected {expected}, found {actual}")]
    BadVersion {
        path: PathBuf,
        expected: u8,
        actual: u8,
    },

    #[error("{path}: file truncated while reading {section}")]
    Truncated { path: PathBuf, section: String },

    #[error("{path}: record {position} carries index {actual}, expected {expected}")]
    RecordIndex {
        path: PathBuf,
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{path}: invalid header value, {reason}")]
    InvalidHeader { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ScatteringError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("channel count mismatch in {context}: expected {expected}, found {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {what} range: min {min}, max {max}, step {step}")]
    InvalidRange {
        what: &'static str,
        min: f64,
        max: f64,
        step: f64,
    },

    #[error("grid point {index} requested out of order, next available is {expected}")]
    OutOfOrder { expected: usize, index: usize },

    #[error("grid point {index} lies at r = {actual}, expected r = {expected} for a uniform step")]
    GridMismatch {
        index: usize,
        expected: f64,
        actual: f64,
    },

    #[error("propagation of energy {energy} (task {task}) failed at grid point {grid_index}, r = {distance}: {source}")]
    Propagation {
        task: usize,
        energy: f64,
        grid_index: usize,
        distance: f64,
        #[source]
        source: SolverError,
    },

    #[error("boundary matching of energy {energy} (task {task}) failed: {source}")]
    Matching {
        task: usize,
        energy: f64,
        #[source]
        source: SolverError,
    },

    #[error("scattering matrix of energy {energy} (task {task}) failed: {source}")]
    Scattering {
        task: usize,
        energy: f64,
        #[source]
        source: SolverError,
    },

    #[error("serialization of {path} failed: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScatteringError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn check_dimension(
        context: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), Self> {
        (expected == actual)
            .then_some(())
            .ok_or(Self::DimensionMismatch {
                context,
                expected,
                actual,
            })
    }
}
