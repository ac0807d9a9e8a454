use serde::{Deserialize, Serialize};

use crate::error::ScatteringError;

/// Uniform range `[min, max]` sampled every `step`, used both for the
/// distance grid and for the list of collision energies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

pub type EnergyRange = GridRange;

impl GridRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Range consisting of the single value `value`.
    pub fn single(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            step: 1.,
        }
    }

    pub fn validate(&self, what: &'static str) -> Result<(), ScatteringError> {
        let valid = self.min.is_finite()
            && self.max.is_finite()
            && self.step.is_finite()
            && self.step > 0.
            && self.max >= self.min;

        valid.then_some(()).ok_or(ScatteringError::InvalidRange {
            what,
            min: self.min,
            max: self.max,
            step: self.step,
        })
    }

    /// Points from `min` up to `max`, a trailing partial step is dropped.
    pub fn len(&self) -> usize {
        let steps = (self.max - self.min) / self.step;
        if !(steps >= 0.) {
            return 0;
        }

        (steps + 1e-9 * steps.max(1.)).floor() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, index: usize) -> f64 {
        self.min + index as f64 * self.step
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        (0..self.len()).map(|i| self.value(i))
    }

    /// Last point of the grid as reached by stepping from `min`.
    pub fn last(&self) -> f64 {
        self.value(self.len().saturating_sub(1))
    }

    /// Whether `value` is the `index`-th grid point up to rounding of the step.
    pub fn matches(&self, index: usize, value: f64) -> bool {
        (self.value(index) - value).abs() <= 1e-9 * self.step.max(value.abs())
    }
}
