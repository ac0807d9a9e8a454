use faer::Mat;

use crate::{
    boundary::{BoundaryMatcher, ReactionMatrix},
    channels::ChannelBasis,
    error::ScatteringError,
    observables::s_matrix::{ScatteringMatrix, ScatteringSummary},
};

/// Everything computed for one collision energy.
#[derive(Clone, Debug)]
pub struct EnergyOutcome {
    pub index: usize,
    pub energy: f64,
    pub ratio: Mat<f64>,
    pub reaction: ReactionMatrix,
    /// Missing when no channel is open at this energy.
    pub scattering: Option<ScatteringMatrix>,
}

impl EnergyOutcome {
    /// Matches a propagated ratio matrix and builds the scattering matrix over open channels.
    pub fn compute(
        index: usize,
        energy: f64,
        ratio: Mat<f64>,
        matcher: &BoundaryMatcher,
        basis: &ChannelBasis,
    ) -> Result<Self, ScatteringError> {
        ScatteringError::check_dimension("ratio matrix vs channel basis", basis.len(), ratio.nrows())?;
        ScatteringError::check_dimension("ratio matrix columns", ratio.nrows(), ratio.ncols())?;

        let reaction = matcher
            .match_ratio(energy, ratio.as_ref(), basis)
            .map_err(|source| ScatteringError::Matching {
                task: index,
                energy,
                source,
            })?;

        let scattering = if reaction.open_count > 0 {
            let s = ScatteringMatrix::from_reaction(reaction.open_block().as_ref()).map_err(
                |source| ScatteringError::Scattering {
                    task: index,
                    energy,
                    source,
                },
            )?;

            tracing::debug!(
                index,
                energy,
                open = reaction.open_count,
                unitarity = s.unitarity_deviation(),
                "scattering matrix built"
            );
            Some(s)
        } else {
            tracing::warn!(index, energy, "no open channels, skipping scattering matrix");
            None
        };

        Ok(Self {
            index,
            energy,
            ratio,
            reaction,
            scattering,
        })
    }

    pub fn open_count(&self) -> usize {
        self.reaction.open_count
    }

    pub fn summary(&self) -> ScatteringSummary {
        let (probabilities, unitarity_deviation) = match &self.scattering {
            Some(s) => (s.transition_probabilities(), s.unitarity_deviation()),
            None => (Vec::new(), 0.),
        };

        ScatteringSummary {
            index: self.index,
            energy: self.energy,
            open_count: self.reaction.open_count,
            open_channels: self.reaction.open_indices(),
            probabilities,
            unitarity_deviation,
        }
    }
}
