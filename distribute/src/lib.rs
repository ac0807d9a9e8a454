pub mod aggregator;
pub mod comm;
pub mod config;
pub mod context;
pub mod error;
#[cfg(feature = "mpi")]
pub mod mpi_world;
pub mod partition;
pub mod process;
pub mod run;
pub mod wire;
pub mod worker;
