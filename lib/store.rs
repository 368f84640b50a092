//! Persistence of run artifacts as `.npz` archives.
//!
//! The on-disk layout is a contract with downstream spectroscopy codes:
//! per-manifold-pair eigenvalues and left/right eigenvectors, raw and pruned
//! dipole tensors with their boolean occupancy masks (stored as `u8`), the
//! thermal initial density vector, optional Liouvillian blocks for external
//! propagators, and timing metadata. Archive entries are keyed
//! `"{ket}_{bra}"` and `"{k}_{l}_to_{k2}_{l2}"`; a whole-space eigensystem is
//! stored under `"all_manifolds"`.

use std::{ fs::File, path::Path };
use ndarray as nd;
use ndarray_npy::{ write_npy, NpzWriter };
use crate::{
    error::VibronicResult,
    vibronic::{ EigenArtifacts, RunArtifacts },
};

/// Write every artifact of a run into `dir`, creating it if needed.
pub fn save_artifacts<P: AsRef<Path>>(dir: P, artifacts: &RunArtifacts)
    -> VibronicResult<()>
{
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    if let Some(eigensystems) = artifacts.eigensystems.as_ref() {
        save_eigensystems(dir, eigensystems)?;
    }
    if let Some(dipoles) = artifacts.dipoles.as_ref() {
        let mut mu = NpzWriter::new_compressed(
            File::create(dir.join("mu.npz"))?);
        let mut mu_pruned = NpzWriter::new_compressed(
            File::create(dir.join("mu_pruned.npz"))?);
        let mut mu_boolean = NpzWriter::new_compressed(
            File::create(dir.join("mu_boolean.npz"))?);
        for (key, block) in dipoles.iter() {
            let name = key.to_string();
            mu.add_array(name.as_str(), &block.tensor)?;
            mu_pruned.add_array(name.as_str(), &block.pruned)?;
            mu_boolean.add_array(
                name.as_str(),
                &block.mask.mapv(|b| u8::from(b)),
            )?;
        }
        mu.finish()?;
        mu_pruned.finish()?;
        mu_boolean.finish()?;
    }
    if let Some(liouvillians) = artifacts.liouvillians.as_ref() {
        let mut writer = NpzWriter::new_compressed(
            File::create(dir.join("liouvillian.npz"))?);
        for (key, block) in liouvillians.iter() {
            writer.add_array(key.to_string().as_str(), block)?;
        }
        writer.finish()?;
    }

    write_npy(dir.join("rho0.npy"), &artifacts.rho0)?;

    let mut timings = NpzWriter::new_compressed(
        File::create(dir.join("timings.npz"))?);
    timings.add_array(
        "h_diagonalization",
        &nd::arr0(artifacts.timings.h_diagonalization),
    )?;
    timings.add_array(
        "l_construction",
        &nd::arr0(artifacts.timings.l_construction),
    )?;
    timings.add_array(
        "l_diagonalization",
        &nd::arr0(artifacts.timings.l_diagonalization),
    )?;
    timings.finish()?;

    Ok(())
}

fn save_eigensystems(dir: &Path, eigensystems: &EigenArtifacts)
    -> VibronicResult<()>
{
    let mut eigenvalues = NpzWriter::new_compressed(
        File::create(dir.join("eigenvalues.npz"))?);
    let mut right = NpzWriter::new_compressed(
        File::create(dir.join("right_eigenvectors.npz"))?);
    let mut left = NpzWriter::new_compressed(
        File::create(dir.join("left_eigenvectors.npz"))?);
    match eigensystems {
        EigenArtifacts::ByManifold(map) => {
            for (key, eig) in map.iter() {
                let name = key.to_string();
                eigenvalues.add_array(name.as_str(), &eig.eigenvalues)?;
                right.add_array(name.as_str(), &eig.right)?;
                left.add_array(name.as_str(), &eig.left)?;
            }
        },
        EigenArtifacts::Full(eig) => {
            eigenvalues.add_array("all_manifolds", &eig.eigenvalues)?;
            right.add_array("all_manifolds", &eig.right)?;
            left.add_array("all_manifolds", &eig.left)?;
        },
    }
    eigenvalues.finish()?;
    right.finish()?;
    left.finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::SystemConfig,
        oscillator::DisplacedOscillator,
        vibronic,
    };

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("vibronic_lindblad").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn monomer_config() -> SystemConfig {
        SystemConfig::from_toml(r#"
site_energies = [1.0]
site_couplings = []
dipoles = [[1.0, 0.0, 0.0]]
truncation_size = 3

[rates]
optical_dephasing = 0.1
exciton_exciton_dephasing = 0.0
vibrational_relaxation = 0.1
kt = 1.0

[[vibrations]]
frequency = 0.2
site = 0

[vibrations.ground]
displacement = 0.0

[vibrations.excited]
displacement = 1.0
"#).unwrap()
    }

    #[test]
    fn eigensystem_run_writes_the_full_contract() {
        let config = monomer_config();
        let (_, artifacts) = vibronic::execute(
            &config, &DisplacedOscillator).unwrap();
        let dir = scratch_dir("eigensystems");
        save_artifacts(&dir, &artifacts).unwrap();
        for name in [
            "eigenvalues.npz",
            "right_eigenvectors.npz",
            "left_eigenvectors.npz",
            "mu.npz",
            "mu_pruned.npz",
            "mu_boolean.npz",
            "rho0.npy",
            "timings.npz",
        ] {
            assert!(dir.join(name).is_file(), "missing {name}");
        }
        assert!(!dir.join("liouvillian.npz").exists());
    }

    #[test]
    fn propagation_run_writes_liouvillian_blocks() {
        let mut config = monomer_config();
        config.for_propagation = true;
        let (_, artifacts) = vibronic::execute(
            &config, &DisplacedOscillator).unwrap();
        let dir = scratch_dir("propagation");
        save_artifacts(&dir, &artifacts).unwrap();
        assert!(dir.join("liouvillian.npz").is_file());
        assert!(!dir.join("eigenvalues.npz").exists());
    }
}
