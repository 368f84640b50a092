//! Run description parsed from a TOML document.
//!
//! The document supplies site energies, the canonically ordered coupling
//! list, per-site dipole vectors, vibrational mode tables, the truncation
//! size, an optional maximum manifold, and named dissipation rate overrides.
//! Every rate omitted from the document keeps its named default.

use std::path::Path;
use serde::Deserialize;
use crate::{
    dissipation::DissipationRates,
    error::{ VibronicError, VibronicResult },
    oscillator::OscillatorParams,
    vibrational::Mode,
};

/// Shape of one vibrational surface as written in the document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub reorganization: f64,
    #[serde(default)]
    pub displacement: f64,
    #[serde(default = "default_shape")]
    pub kinetic: Vec<f64>,
    #[serde(default = "default_shape")]
    pub potential: Vec<f64>,
}

fn default_shape() -> Vec<f64> { vec![1.0] }

impl From<SurfaceConfig> for OscillatorParams {
    fn from(s: SurfaceConfig) -> Self {
        Self {
            reorganization: s.reorganization,
            displacement: s.displacement,
            kinetic: s.kinetic,
            potential: s.potential,
        }
    }
}

/// One vibrational mode table.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeConfig {
    pub frequency: f64,
    pub site: usize,
    pub ground: SurfaceConfig,
    pub excited: SurfaceConfig,
}

impl From<ModeConfig> for Mode {
    fn from(m: ModeConfig) -> Self {
        Self {
            frequency: m.frequency,
            site: m.site,
            ground: m.ground.into(),
            excited: m.excited.into(),
        }
    }
}

/// The full run description.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Site excitation energies, one per site.
    pub site_energies: Vec<f64>,
    /// Couplings for each unordered site pair in lexicographic order
    /// (`J_01, J_02, ..., J_12, ...`).
    #[serde(default)]
    pub site_couplings: Vec<f64>,
    /// One (x, y, z) transition-dipole vector per site.
    pub dipoles: Vec<[f64; 3]>,
    /// Vibrational mode tables.
    #[serde(default)]
    pub vibrations: Vec<ModeConfig>,
    /// Per-mode vibrational ladder truncation size.
    pub truncation_size: usize,
    /// Highest excitation manifold to keep; defaults to the site count and
    /// is clamped to it.
    #[serde(default)]
    pub maximum_manifold: Option<usize>,
    /// Dissipation rate overrides; omitted entries keep their defaults.
    #[serde(default)]
    pub rates: DissipationRates,
    /// Restrict the vibrational space to total occupation below the
    /// truncation size.
    #[serde(default = "default_true")]
    pub mask_by_occupation: bool,
    /// Replace site-basis dissipation with eigenstate decoherence rates that
    /// satisfy detailed balance exactly.
    #[serde(default)]
    pub force_detailed_balance: bool,
    /// Persist Liouvillian blocks and site-basis dipoles for an external
    /// propagator instead of eigensystems.
    #[serde(default)]
    pub for_propagation: bool,
}

fn default_true() -> bool { true }

impl SystemConfig {
    /// Parse a TOML document.
    pub fn from_toml(doc: &str) -> VibronicResult<Self> {
        let config: Self = toml::from_str(doc)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> VibronicResult<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Number of sites.
    pub fn num_sites(&self) -> usize { self.site_energies.len() }

    /// The effective maximum manifold, clamped to the site count.
    pub fn max_manifold(&self) -> usize {
        self.maximum_manifold
            .unwrap_or(self.num_sites())
            .min(self.num_sites())
    }

    /// The configured modes as model types.
    pub fn modes(&self) -> Vec<Mode> {
        self.vibrations.iter().cloned().map(Mode::from).collect()
    }

    fn validate(&self) -> VibronicResult<()> {
        let n = self.num_sites();
        if n == 0 {
            return Err(VibronicError::ConfigInvalid(
                "site_energies must not be empty".into()));
        }
        if self.site_couplings.len() != n * (n - 1) / 2 {
            return Err(VibronicError::ConfigInvalid(format!(
                "expected {} site_couplings for {} sites, got {}",
                n * (n - 1) / 2, n, self.site_couplings.len())));
        }
        if self.dipoles.len() != n {
            return Err(VibronicError::ConfigInvalid(format!(
                "expected {} dipole vectors, got {}", n, self.dipoles.len())));
        }
        if self.truncation_size == 0 {
            return Err(VibronicError::ConfigInvalid(
                "truncation_size must be at least 1".into()));
        }
        for (k, mode) in self.vibrations.iter().enumerate() {
            if mode.site >= n {
                return Err(VibronicError::ConfigInvalid(format!(
                    "vibration {} names site {} but there are only {} sites",
                    k, mode.site, n)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dissipation::DEFAULT_EXCITON_DEPHASING;

    const DOC: &str = r#"
site_energies = [1.0, 1.1]
site_couplings = [0.25]
dipoles = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
truncation_size = 5

[rates]
optical_dephasing = 0.05
kt = 0.5

[[vibrations]]
frequency = 0.2
site = 0

[vibrations.ground]
displacement = 0.0

[vibrations.excited]
displacement = 1.2
reorganization = 0.1
"#;

    #[test]
    fn document_round_trips_with_defaults() {
        let config = SystemConfig::from_toml(DOC).unwrap();
        assert_eq!(config.num_sites(), 2);
        assert_eq!(config.max_manifold(), 2);
        assert_eq!(config.rates.optical_dephasing, 0.05);
        assert_eq!(config.rates.kt, 0.5);
        // untouched rates keep their named defaults
        assert_eq!(
            config.rates.exciton_exciton_dephasing,
            DEFAULT_EXCITON_DEPHASING,
        );
        assert!(config.mask_by_occupation);
        let modes = config.modes();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].excited.displacement, 1.2);
        assert_eq!(modes[0].ground.kinetic, vec![1.0]);
    }

    #[test]
    fn maximum_manifold_is_clamped_to_the_site_count() {
        let doc = format!("maximum_manifold = 7\n{DOC}");
        let config = SystemConfig::from_toml(&doc).unwrap();
        assert_eq!(config.max_manifold(), 2);
    }

    #[test]
    fn coupling_count_mismatch_is_rejected() {
        let doc = DOC.replace("site_couplings = [0.25]", "site_couplings = []");
        assert!(matches!(
            SystemConfig::from_toml(&doc),
            Err(VibronicError::ConfigInvalid(_)),
        ));
    }

    #[test]
    fn mode_site_indices_are_checked() {
        let doc = DOC.replace("site = 0", "site = 5");
        assert!(matches!(
            SystemConfig::from_toml(&doc),
            Err(VibronicError::ConfigInvalid(_)),
        ));
    }
}
