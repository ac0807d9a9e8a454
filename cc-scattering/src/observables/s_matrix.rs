use faer::{Mat, MatRef, c64};
use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{error::SolverError, linalg::solve};

/// Unitary scattering matrix over the open channels, stored as real and imaginary parts.
#[derive(Clone, Debug)]
pub struct ScatteringMatrix {
    pub re: Mat<f64>,
    pub im: Mat<f64>,
}

impl ScatteringMatrix {
    /// Builds S from a real symmetric reaction matrix with
    /// `(I + K^2) Im S = 2K` and `Re S = K Im S - I`.
    pub fn from_reaction(k: MatRef<f64>) -> Result<Self, SolverError> {
        assert_eq!(k.nrows(), k.ncols());
        let size = k.nrows();

        let mut lhs = k * k;
        for i in 0..size {
            lhs[(i, i)] += 1.;
        }
        let rhs = Mat::from_fn(size, size, |i, j| 2. * k[(i, j)]);

        let im = solve(lhs.as_ref(), rhs.as_ref(), "scattering matrix")?;

        let mut re = k * im.as_ref();
        for i in 0..size {
            re[(i, i)] -= 1.;
        }

        Ok(Self { re, im })
    }

    pub fn size(&self) -> usize {
        self.re.nrows()
    }

    pub fn element(&self, i: usize, j: usize) -> Complex64 {
        Complex64::new(self.re[(i, j)], self.im[(i, j)])
    }

    pub fn as_complex(&self) -> Mat<c64> {
        Mat::from_fn(self.size(), self.size(), |i, j| {
            c64::new(self.re[(i, j)], self.im[(i, j)])
        })
    }

    /// |S_ij|^2
    pub fn transition_probability(&self, i: usize, j: usize) -> f64 {
        self.element(i, j).norm_sqr()
    }

    pub fn transition_probabilities(&self) -> Vec<Vec<f64>> {
        (0..self.size())
            .map(|i| (0..self.size()).map(|j| self.transition_probability(i, j)).collect())
            .collect()
    }

    /// Largest entry of `|S S^dagger - I|`.
    pub fn unitarity_deviation(&self) -> f64 {
        let re = self.re.as_ref();
        let im = self.im.as_ref();

        let real = re * re.transpose() + im * im.transpose();
        let imag = im * re.transpose() - re * im.transpose();

        let mut deviation = 0.0f64;
        for i in 0..self.size() {
            for j in 0..self.size() {
                let delta = if i == j { 1. } else { 0. };
                deviation = deviation
                    .max((real[(i, j)] - delta).abs())
                    .max(imag[(i, j)].abs());
            }
        }

        deviation
    }
}

/// Transition probabilities of one energy, as written to the results summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScatteringSummary {
    pub index: usize,
    pub energy: f64,
    pub open_count: usize,
    pub open_channels: Vec<usize>,
    pub probabilities: Vec<Vec<f64>>,
    pub unitarity_deviation: f64,
}

#[cfg(test)]
mod test {
    use faer::Mat;
    use quantum::assert_approx_eq;
    use rand::{Rng, distr::Uniform, rng};

    use super::ScatteringMatrix;

    #[test]
    fn test_single_channel() {
        let delta: f64 = 0.7;
        let k = Mat::from_fn(1, 1, |_, _| delta.tan());
        let s = ScatteringMatrix::from_reaction(k.as_ref()).unwrap();

        assert_eq!(s.size(), 1);
        assert_approx_eq!(s.transition_probability(0, 0), 1., 1e-12);

        // S = (K + i) / (K - i) = -exp(-2 i delta)
        let expected = -num::complex::Complex64::from_polar(1., -2. * delta);
        assert_approx_eq!(s.element(0, 0).re, expected.re, 1e-12);
        assert_approx_eq!(s.element(0, 0).im, expected.im, 1e-12);
    }

    #[test]
    fn test_unitarity() {
        let mut rng = rng();
        let size = 5;

        let mut k = Mat::from_fn(size, size, |_, _| {
            rng.sample(Uniform::new(-3., 3.).unwrap())
        });
        for j in 0..size {
            for i in 0..j {
                k[(i, j)] = k[(j, i)];
            }
        }

        let s = ScatteringMatrix::from_reaction(k.as_ref()).unwrap();
        assert!(s.unitarity_deviation() < 1e-10);

        for i in 0..size {
            let row: f64 = s.transition_probabilities()[i].iter().sum();
            assert_approx_eq!(row, 1., 1e-10);
        }

        let complex = s.as_complex();
        assert_eq!(complex[(1, 2)].re, s.re[(1, 2)]);
        assert_eq!(complex[(1, 2)].im, s.im[(1, 2)]);
    }

    #[test]
    fn test_empty() {
        let k = Mat::<f64>::zeros(0, 0);
        let s = ScatteringMatrix::from_reaction(k.as_ref()).unwrap();

        assert_eq!(s.size(), 0);
        assert_eq!(s.unitarity_deviation(), 0.);
    }
}
