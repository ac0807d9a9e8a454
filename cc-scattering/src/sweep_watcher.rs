use std::time::{Duration, Instant};

use hhmmss::Hhmmss;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{grid::GridRange, propagator::EnergyTask};

/// Hooks called by [`crate::sweep::Sweep`] around the grid loop.
pub trait SweepWatcher {
    fn before(&mut self, _grid: &GridRange, _tasks: &[EnergyTask]) {}

    fn after_step(&mut self, grid_index: usize, distance: f64, tasks: &[EnergyTask]);

    fn after_sweep(&mut self, _tasks: &[EnergyTask]) {}
}

impl<F: FnMut(usize, f64, &[EnergyTask])> SweepWatcher for F {
    fn after_step(&mut self, grid_index: usize, distance: f64, tasks: &[EnergyTask]) {
        self(grid_index, distance, tasks)
    }
}

/// Watcher that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unwatched;

impl SweepWatcher for Unwatched {
    fn after_step(&mut self, _grid_index: usize, _distance: f64, _tasks: &[EnergyTask]) {}
}

pub struct ManySweepWatcher<'a> {
    watchers: Vec<&'a mut dyn SweepWatcher>,
}

impl<'a> ManySweepWatcher<'a> {
    pub fn new(watchers: Vec<&'a mut dyn SweepWatcher>) -> Self {
        Self { watchers }
    }
}

impl SweepWatcher for ManySweepWatcher<'_> {
    fn before(&mut self, grid: &GridRange, tasks: &[EnergyTask]) {
        for watcher in self.watchers.iter_mut() {
            watcher.before(grid, tasks);
        }
    }

    fn after_step(&mut self, grid_index: usize, distance: f64, tasks: &[EnergyTask]) {
        for watcher in self.watchers.iter_mut() {
            watcher.after_step(grid_index, distance, tasks);
        }
    }

    fn after_sweep(&mut self, tasks: &[EnergyTask]) {
        for watcher in self.watchers.iter_mut() {
            watcher.after_sweep(tasks);
        }
    }
}

/// Reports sweep progress and timing.
pub struct SweepLogging {
    label: String,
    show_progress: bool,
    steps_no: u64,
    timer: Instant,
    progress: ProgressBar,
}

impl Default for SweepLogging {
    fn default() -> Self {
        Self {
            label: String::from("sweep"),
            show_progress: false,
            steps_no: 0,
            timer: Instant::now(),
            progress: ProgressBar::hidden(),
        }
    }
}

impl SweepLogging {
    pub fn new(label: impl Into<String>, show_progress: bool) -> Self {
        Self {
            label: label.into(),
            show_progress,
            ..Default::default()
        }
    }

    pub fn steps_no(&self) -> u64 {
        self.steps_no
    }
}

impl SweepWatcher for SweepLogging {
    fn before(&mut self, grid: &GridRange, tasks: &[EnergyTask]) {
        tracing::info!(
            label = %self.label,
            points = grid.len(),
            r_min = grid.min,
            r_max = grid.max,
            energies = tasks.len(),
            "starting ratio propagation"
        );

        self.steps_no = 0;
        self.timer = Instant::now();
        if self.show_progress {
            self.progress = ProgressBar::new(grid.len() as u64).with_message("grid points");
            if let Ok(style) =
                ProgressStyle::with_template("{bar:60.cyan/blue} {pos:>7} / {len:7} {msg}")
            {
                self.progress.set_style(style);
            }
        }
    }

    fn after_step(&mut self, _grid_index: usize, _distance: f64, _tasks: &[EnergyTask]) {
        self.progress.inc(1);
        self.steps_no += 1;
    }

    fn after_sweep(&mut self, tasks: &[EnergyTask]) {
        self.progress.finish();

        let elapsed = self.timer.elapsed();
        if self.steps_no == 0 {
            tracing::warn!(label = %self.label, "sweep finished without any grid step");
            return;
        }
        let elapsed_step = Duration::from_secs_f64(elapsed.as_secs_f64() / self.steps_no as f64);

        tracing::info!(
            label = %self.label,
            steps = self.steps_no,
            energies = tasks.len(),
            "propagation done in {}, mean time per step {}",
            elapsed.hhmmssxxx(),
            elapsed_step.hhmmssxxx()
        );
    }
}
