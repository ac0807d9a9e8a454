use std::{
    fs,
    path::{Path, PathBuf},
};

use cc_scattering::grid::EnergyRange;
use quantum::units::{Au, CmInv, Energy, EnergyUnit, GHz, Kelvin, MHz};
use serde::{Deserialize, Serialize};

use crate::error::DistributeError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyUnitName {
    #[default]
    Au,
    Kelvin,
    #[serde(rename = "cm-1")]
    CmInv,
    Ghz,
    Mhz,
}

impl EnergyUnitName {
    pub fn to_au(self, value: f64) -> f64 {
        fn convert(value: f64, unit: impl EnergyUnit) -> f64 {
            Energy(value, unit).to_au()
        }

        match self {
            EnergyUnitName::Au => convert(value, Au),
            EnergyUnitName::Kelvin => convert(value, Kelvin),
            EnergyUnitName::CmInv => convert(value, CmInv),
            EnergyUnitName::Ghz => convert(value, GHz),
            EnergyUnitName::Mhz => convert(value, MHz),
        }
    }
}

/// Collision energies as written in the run file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnergySettings {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    #[serde(default)]
    pub unit: EnergyUnitName,
}

impl EnergySettings {
    /// Energy range in hartree.
    pub fn to_range(&self) -> EnergyRange {
        EnergyRange::new(
            self.unit.to_au(self.min),
            self.unit.to_au(self.max),
            self.unit.to_au(self.step),
        )
    }
}

fn default_workers() -> usize {
    1
}

/// Json run file of `ccprop run`.
///
/// Relative paths are taken relative to the directory of the run file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub potential: PathBuf,
    pub basis: PathBuf,
    pub output: PathBuf,
    pub energies: EnergySettings,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Propagate the energies of one worker on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub progress: bool,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DistributeError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DistributeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self =
            serde_json::from_str(&text).map_err(|source| DistributeError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;

        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.potential, &mut self.basis, &mut self.output] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), DistributeError> {
        if self.workers == 0 {
            return Err(DistributeError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }
        self.energies.to_range().validate("energy")?;

        Ok(())
    }

    pub fn energy_range(&self) -> EnergyRange {
        self.energies.to_range()
    }
}
