use faer::{Mat, MatRef};
use quantum::utility::{ratio_riccati_i, ratio_riccati_k, riccati_j, riccati_n};

use crate::{
    channels::{Channel, ChannelBasis},
    error::SolverError,
    grid::GridRange,
    linalg::solve,
};

/// Values of the two asymptotic solutions of one channel
/// at the last grid point and one step beyond it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AsymptoticValues {
    pub j_in: f64,
    pub j_out: f64,
    pub n_in: f64,
    pub n_out: f64,
}

/// Matches the final ratio matrix to Riccati-Bessel asymptotics.
#[derive(Clone, Copy, Debug)]
pub struct BoundaryMatcher {
    pub mass: f64,
    pub step: f64,
    pub max_distance: f64,
}

impl BoundaryMatcher {
    pub fn new(mass: f64, step: f64, max_distance: f64) -> Self {
        Self {
            mass,
            step,
            max_distance,
        }
    }

    /// Matcher for a ratio propagated over the whole `grid`.
    pub fn from_grid(mass: f64, grid: &GridRange) -> Self {
        Self::new(mass, grid.step, grid.last())
    }

    /// Renormalization factor `1 - T` with the asymptotic effective potential.
    pub fn correction(&self, energy: f64, channel: &Channel, r: f64) -> f64 {
        let centrifugal = channel.centrifugal() / (2. * self.mass * r * r);

        1. + self.step * self.step * self.mass / 6. * (energy - channel.threshold - centrifugal)
    }

    pub fn asymptotic_values(&self, energy: f64, channel: &Channel) -> AsymptoticValues {
        let r_in = self.max_distance;
        let r_out = self.max_distance + self.step;
        let c_in = self.correction(energy, channel, r_in);
        let c_out = self.correction(energy, channel, r_out);

        if channel.is_open(energy) {
            let k = (2. * self.mass * (energy - channel.threshold)).sqrt();
            let norm = k.sqrt();

            AsymptoticValues {
                j_in: c_in * riccati_j(channel.l, k * r_in) / norm,
                j_out: c_out * riccati_j(channel.l, k * r_out) / norm,
                n_in: c_in * riccati_n(channel.l, k * r_in) / norm,
                n_out: c_out * riccati_n(channel.l, k * r_out) / norm,
            }
        } else {
            let kappa = (2. * self.mass * (channel.threshold - energy)).sqrt();
            let (ratio_i, ratio_k) = if kappa == 0. {
                let l = channel.l as i32;
                ((r_out / r_in).powi(l + 1), (r_in / r_out).powi(l))
            } else {
                (
                    ratio_riccati_i(channel.l, kappa * r_out, kappa * r_in),
                    ratio_riccati_k(channel.l, kappa * r_out, kappa * r_in),
                )
            };

            AsymptoticValues {
                j_in: 1.,
                j_out: ratio_i * c_out / c_in,
                n_in: 1.,
                n_out: ratio_k * c_out / c_in,
            }
        }
    }

    /// Solves `(R N_in - N_out) K = R J_in - J_out` for the reaction matrix,
    /// where `R` maps the renormalized solution at `max_distance` onto `max_distance + step`.
    pub fn match_ratio(
        &self,
        energy: f64,
        ratio: MatRef<f64>,
        basis: &ChannelBasis,
    ) -> Result<ReactionMatrix, SolverError> {
        let size = basis.len();
        assert_eq!(ratio.nrows(), size, "ratio matrix does not match channel basis");
        assert_eq!(ratio.ncols(), size, "ratio matrix does not match channel basis");

        let open_mask = basis.is_open(energy);
        let open_count = open_mask.iter().filter(|&&o| o).count();
        if open_count == 0 {
            return Ok(ReactionMatrix {
                full: Mat::zeros(size, size),
                open_mask,
                open_count,
            });
        }

        let values: Vec<AsymptoticValues> = basis
            .channels()
            .iter()
            .map(|c| self.asymptotic_values(energy, c))
            .collect();

        let delta = |a: usize, b: usize| if a == b { 1. } else { 0. };
        let lhs = Mat::from_fn(size, size, |a, b| {
            ratio[(a, b)] * values[b].n_in - delta(a, b) * values[a].n_out
        });
        let rhs = Mat::from_fn(size, size, |a, b| {
            ratio[(a, b)] * values[b].j_in - delta(a, b) * values[a].j_out
        });

        let full = solve(lhs.as_ref(), rhs.as_ref(), "boundary matching")?;

        Ok(ReactionMatrix {
            full,
            open_mask,
            open_count,
        })
    }
}

/// Reaction matrix over all channels, only its open-open block is physical.
#[derive(Clone, Debug)]
pub struct ReactionMatrix {
    pub full: Mat<f64>,
    pub open_mask: Vec<bool>,
    pub open_count: usize,
}

impl ReactionMatrix {
    pub fn open_indices(&self) -> Vec<usize> {
        self.open_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &open)| open.then_some(i))
            .collect()
    }

    /// Symmetrized open-open block of K.
    pub fn open_block(&self) -> Mat<f64> {
        let open = self.open_indices();

        Mat::from_fn(open.len(), open.len(), |i, j| {
            0.5 * (self.full[(open[i], open[j])] + self.full[(open[j], open[i])])
        })
    }
}
