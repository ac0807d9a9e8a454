pub mod binary;
pub mod boundary;
pub mod channels;
pub mod error;
pub mod grid;
pub mod linalg;
pub mod observables;
pub mod potential;
pub mod propagator;
pub mod sweep;
pub mod sweep_watcher;
pub mod utility;

pub extern crate faer;
