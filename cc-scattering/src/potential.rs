use faer::{Mat, MatMut};

use crate::{error::ScatteringError, grid::GridRange};

/// Supplies the channel coupling matrix at each point of the distance grid.
///
/// Points have to be requested in strictly increasing index order,
/// implementations backed by a stream may reject anything else.
pub trait GridPotentialSource {
    fn channel_count(&self) -> usize;

    fn reduced_mass(&self) -> f64;

    fn grid(&self) -> GridRange;

    /// Writes the potential matrix at grid point `index` into `out`
    /// and returns the distance of that point.
    fn load(&mut self, index: usize, out: MatMut<f64>) -> Result<f64, ScatteringError>;
}

impl<S: GridPotentialSource + ?Sized> GridPotentialSource for &mut S {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn reduced_mass(&self) -> f64 {
        (**self).reduced_mass()
    }

    fn grid(&self) -> GridRange {
        (**self).grid()
    }

    fn load(&mut self, index: usize, out: MatMut<f64>) -> Result<f64, ScatteringError> {
        (**self).load(index, out)
    }
}

/// Potential table kept in memory.
#[derive(Clone, Debug)]
pub struct TabulatedPotential {
    mass: f64,
    grid: GridRange,
    distances: Vec<f64>,
    values: Vec<Mat<f64>>,
}

impl TabulatedPotential {
    pub fn new(
        mass: f64,
        grid: GridRange,
        distances: Vec<f64>,
        values: Vec<Mat<f64>>,
    ) -> Result<Self, ScatteringError> {
        grid.validate("distance grid")?;
        ScatteringError::check_dimension("potential table length", grid.len(), values.len())?;
        ScatteringError::check_dimension("potential distances", values.len(), distances.len())?;

        let size = values.first().map_or(0, |v| v.nrows());
        for value in &values {
            ScatteringError::check_dimension("potential matrix rows", size, value.nrows())?;
            ScatteringError::check_dimension("potential matrix columns", size, value.ncols())?;
        }

        Ok(Self {
            mass,
            grid,
            distances,
            values,
        })
    }

    /// Reads every grid point of `source` into memory.
    pub fn sample(source: &mut impl GridPotentialSource) -> Result<Self, ScatteringError> {
        let grid = source.grid();
        let size = source.channel_count();

        let mut distances = Vec::with_capacity(grid.len());
        let mut values = Vec::with_capacity(grid.len());
        for index in 0..grid.len() {
            let mut value = Mat::zeros(size, size);
            distances.push(source.load(index, value.as_mut())?);
            values.push(value);
        }

        Self::new(source.reduced_mass(), grid, distances, values)
    }

    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    pub fn values(&self) -> &[Mat<f64>] {
        &self.values
    }
}

impl GridPotentialSource for TabulatedPotential {
    fn channel_count(&self) -> usize {
        self.values.first().map_or(0, |v| v.nrows())
    }

    fn reduced_mass(&self) -> f64 {
        self.mass
    }

    fn grid(&self) -> GridRange {
        self.grid
    }

    fn load(&mut self, index: usize, mut out: MatMut<f64>) -> Result<f64, ScatteringError> {
        let value = self.values.get(index).ok_or(ScatteringError::OutOfOrder {
            expected: self.values.len(),
            index,
        })?;
        out.copy_from(value.as_ref());

        Ok(self.distances[index])
    }
}

/// Potential evaluated from a function of distance at every grid point.
pub struct FunctionPotential<F> {
    mass: f64,
    grid: GridRange,
    size: usize,
    function: F,
}

impl<F: Fn(f64, MatMut<f64>)> FunctionPotential<F> {
    pub fn new(mass: f64, grid: GridRange, size: usize, function: F) -> Self {
        Self {
            mass,
            grid,
            size,
            function,
        }
    }
}

impl<F: Fn(f64, MatMut<f64>)> GridPotentialSource for FunctionPotential<F> {
    fn channel_count(&self) -> usize {
        self.size
    }

    fn reduced_mass(&self) -> f64 {
        self.mass
    }

    fn grid(&self) -> GridRange {
        self.grid
    }

    fn load(&mut self, index: usize, mut out: MatMut<f64>) -> Result<f64, ScatteringError> {
        ScatteringError::check_dimension("function potential", self.size, out.nrows())?;

        let r = self.grid.value(index);
        out.fill(0.);
        (self.function)(r, out);

        Ok(r)
    }
}
