use faer::Mat;
use rayon::prelude::*;

use crate::{
    error::ScatteringError, potential::GridPotentialSource, propagator::EnergyTask,
    sweep_watcher::SweepWatcher,
};

/// Drives the grid loop: every grid point is loaded once and
/// applied to all energy tasks before moving outwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sweep {
    /// Propagate the energies of one grid step on the rayon pool.
    pub parallel: bool,
}

impl Sweep {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    pub fn run(
        &self,
        source: &mut impl GridPotentialSource,
        tasks: &mut [EnergyTask],
        watcher: &mut impl SweepWatcher,
    ) -> Result<(), ScatteringError> {
        let grid = source.grid();
        grid.validate("distance grid")?;

        let size = source.channel_count();
        let mass = source.reduced_mass();
        for task in tasks.iter() {
            ScatteringError::check_dimension("energy task vs potential", size, task.size())?;
        }

        watcher.before(&grid, tasks);

        let mut potential = Mat::zeros(size, size);
        for grid_index in 0..grid.len() {
            let distance = source.load(grid_index, potential.as_mut())?;
            if !grid.matches(grid_index, distance) {
                return Err(ScatteringError::GridMismatch {
                    index: grid_index,
                    expected: grid.value(grid_index),
                    actual: distance,
                });
            }

            let potential = potential.as_ref();
            let propagate = |task: &mut EnergyTask| {
                task.advance(mass, grid.step, potential)
                    .map_err(|source| ScatteringError::Propagation {
                        task: task.index,
                        energy: task.energy,
                        grid_index,
                        distance,
                        source,
                    })
            };

            if self.parallel {
                tasks.par_iter_mut().try_for_each(propagate)?;
            } else {
                tasks.iter_mut().try_for_each(propagate)?;
            }

            watcher.after_step(grid_index, distance, tasks);
        }

        watcher.after_sweep(tasks);

        Ok(())
    }
}
