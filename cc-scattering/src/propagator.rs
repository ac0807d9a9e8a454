use faer::{Mat, MatRef, dyn_stack::MemBuffer};

use crate::{
    error::SolverError,
    linalg::{LinearSolver, get_lblt_inverse_buffer, inverse_lblt_inplace, is_zero},
};

/// Constants of one energy's sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParams {
    pub mass: f64,
    pub step: f64,
    pub energy: f64,
}

impl StepParams {
    /// Numerov coefficient `h^2 / 12 * W` for `psi'' = W psi`,
    /// with `W = 2 mass (V - E)`.
    #[inline]
    pub fn coefficient(&self, energy_diff: f64) -> f64 {
        -self.step * self.step * self.mass / 6. * energy_diff
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Zero matrix marking that no previous step exists, never inverted.
    Sentinel,
    /// Holds a ratio matrix.
    Uninverted,
    /// Holds the inverse of the ratio matrix it had.
    Inverted,
    /// Content is scratch until the next step rewrites it.
    Consumed,
}

/// Ratio matrix storage that tracks whether its content was inverted in place.
#[derive(Clone, Debug)]
pub struct RatioSlot {
    matrix: Mat<f64>,
    state: SlotState,
}

impl RatioSlot {
    pub fn sentinel(size: usize) -> Self {
        Self {
            matrix: Mat::zeros(size, size),
            state: SlotState::Sentinel,
        }
    }

    pub fn from_matrix(matrix: Mat<f64>) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "ratio matrix has to be square");

        let state = if is_zero(matrix.as_ref()) {
            SlotState::Sentinel
        } else {
            SlotState::Uninverted
        };

        Self { matrix, state }
    }

    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Current ratio matrix, available only before it gets consumed by a step.
    pub fn ratio(&self) -> Option<MatRef<'_, f64>> {
        match self.state {
            SlotState::Sentinel | SlotState::Uninverted => Some(self.matrix.as_ref()),
            SlotState::Inverted | SlotState::Consumed => None,
        }
    }

    pub fn into_ratio(self) -> Option<Mat<f64>> {
        match self.state {
            SlotState::Sentinel | SlotState::Uninverted => Some(self.matrix),
            SlotState::Inverted | SlotState::Consumed => None,
        }
    }
}

/// Per energy workspace of the renormalized Numerov recursion
/// `R_n = (I - T_n)^-1 (2I + 10 T_n) - R_{n-1}^-1`.
pub struct RatioNumerovStep {
    lhs: Mat<f64>,
    inverse: Mat<f64>,
    inverse_buffer: MemBuffer,
    solver: LinearSolver,
}

impl RatioNumerovStep {
    pub fn new(size: usize) -> Self {
        Self {
            lhs: Mat::zeros(size, size),
            inverse: Mat::zeros(size, size),
            inverse_buffer: get_lblt_inverse_buffer(size),
            solver: LinearSolver::new(size),
        }
    }

    pub fn size(&self) -> usize {
        self.lhs.nrows()
    }

    /// Advances `prev` into `next` with the potential at the current grid point.
    ///
    /// `prev` ends up consumed and `next` holds the new ratio matrix.
    /// Only the upper triangle of `potential` is read.
    pub fn advance(
        &mut self,
        params: &StepParams,
        potential: MatRef<f64>,
        prev: &mut RatioSlot,
        next: &mut RatioSlot,
    ) -> Result<(), SolverError> {
        let size = self.size();
        assert_eq!(potential.nrows(), size);
        assert_eq!(potential.ncols(), size);
        assert_eq!(prev.size(), size);
        assert_eq!(next.size(), size);

        self.invert_previous(prev)?;

        let next_matrix = &mut next.matrix;
        for b in 0..size {
            for a in 0..=b {
                let energy_diff = if a == b {
                    params.energy - potential[(a, b)]
                } else {
                    -potential[(a, b)]
                };
                let t = params.coefficient(energy_diff);
                let delta = if a == b { 1. } else { 0. };

                self.lhs[(a, b)] = delta - t;
                self.lhs[(b, a)] = delta - t;
                next_matrix[(a, b)] = 2. * delta + 10. * t;
                next_matrix[(b, a)] = 2. * delta + 10. * t;
            }
        }

        next.state = SlotState::Consumed;
        self.solver
            .solve_inplace(self.lhs.as_ref(), next_matrix.as_mut(), "propagation step")?;

        let subtract_inverse = prev.state == SlotState::Inverted;
        for b in 0..size {
            for a in 0..=b {
                let mut value = next_matrix[(a, b)];
                if subtract_inverse {
                    value -= prev.matrix[(a, b)];
                }

                next_matrix[(a, b)] = value;
                next_matrix[(b, a)] = value;
            }
        }

        prev.state = SlotState::Consumed;
        next.state = SlotState::Uninverted;

        Ok(())
    }

    fn invert_previous(&mut self, prev: &mut RatioSlot) -> Result<(), SolverError> {
        match prev.state {
            SlotState::Sentinel => Ok(()),
            SlotState::Uninverted => {
                inverse_lblt_inplace(
                    prev.matrix.as_ref(),
                    self.inverse.as_mut(),
                    &mut self.inverse_buffer,
                    "ratio inversion",
                )?;
                std::mem::swap(&mut prev.matrix, &mut self.inverse);
                prev.state = SlotState::Inverted;

                Ok(())
            }
            SlotState::Inverted | SlotState::Consumed => {
                panic!("ratio slot in state {:?} cannot start a step", prev.state)
            }
        }
    }
}

/// One collision energy being propagated, with its double buffered ratio slots.
pub struct EnergyTask {
    pub index: usize,
    pub energy: f64,
    current: RatioSlot,
    scratch: RatioSlot,
    step: RatioNumerovStep,
}

impl EnergyTask {
    pub fn new(index: usize, energy: f64, size: usize) -> Self {
        Self {
            index,
            energy,
            current: RatioSlot::sentinel(size),
            scratch: RatioSlot::sentinel(size),
            step: RatioNumerovStep::new(size),
        }
    }

    /// Starts from a known ratio matrix instead of the sentinel.
    pub fn with_initial(index: usize, energy: f64, initial: Mat<f64>) -> Self {
        let size = initial.nrows();
        let mut task = Self::new(index, energy, size);
        task.current = RatioSlot::from_matrix(initial);

        task
    }

    pub fn size(&self) -> usize {
        self.step.size()
    }

    pub fn advance(&mut self, mass: f64, step: f64, potential: MatRef<f64>) -> Result<(), SolverError> {
        let params = StepParams {
            mass,
            step,
            energy: self.energy,
        };

        self.step
            .advance(&params, potential, &mut self.current, &mut self.scratch)?;
        std::mem::swap(&mut self.current, &mut self.scratch);

        Ok(())
    }

    pub fn ratio(&self) -> MatRef<'_, f64> {
        self.current
            .ratio()
            .unwrap_or_else(|| panic!("task {} lost its current ratio", self.index))
    }

    pub fn into_ratio(self) -> Mat<f64> {
        let index = self.index;
        self.current
            .into_ratio()
            .unwrap_or_else(|| panic!("task {index} lost its current ratio"))
    }
}
