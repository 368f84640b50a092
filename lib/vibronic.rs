//! The vibronic pipeline: total Hamiltonian, manifold-resolved Liouvillian
//! blocks, their eigensystems, and the transformed dipole tensors.
//!
//! Construction is a strict pipeline. [`VibronicSystem::build`] assembles
//! every operator exactly once from the electronic and vibrational models;
//! [`VibronicSystem::run`] then produces a [`RunArtifacts`] value holding the
//! outputs that downstream spectroscopy codes consume. Nothing is mutated
//! after its construction stage.

use std::time::Instant;
use indexmap::IndexMap;
use ndarray::{ self as nd, linalg::kron };
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    config::SystemConfig,
    dipole::{ self, DipoleBlock, DipoleKey, DipoleSet },
    dissipation::{
        self,
        boltzmann,
        DissipationRates,
        LindbladInstruction,
    },
    eigen::{ self, Eigensystem },
    electronic::Polymer,
    error::{ VibronicError, VibronicResult },
    liouvillian::{ self, ManifoldKey },
    oscillator::Oscillator,
    tensor::{ dagger, gather, kron_vec },
    vibrational::VibrationalSpace,
};

/// Wall-clock costs of the expensive pipeline stages, in seconds.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Timings {
    pub h_diagonalization: f64,
    pub l_construction: f64,
    pub l_diagonalization: f64,
}

/// Which outputs a run produces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Diagonalize each manifold block of the Liouvillian independently, or
    /// the full truncated space when manifolds are not separable.
    Eigensystems,
    /// Rotate each block into the Hamiltonian eigenbasis and replace
    /// site-basis dissipation with eigenstate decoherence rates satisfying
    /// detailed balance exactly.
    DetailedBalance,
    /// Keep the Liouvillian blocks and site-basis dipoles for an external
    /// propagator; no diagonalization.
    Propagation {
        /// Build the blocks in the Hamiltonian eigenbasis with forced
        /// detailed balance first.
        detailed_balance: bool,
    },
}

impl RunMode {
    /// The mode selected by a configuration document.
    pub fn from_config(config: &SystemConfig) -> Self {
        if config.for_propagation {
            Self::Propagation {
                detailed_balance: config.force_detailed_balance,
            }
        } else if config.force_detailed_balance {
            Self::DetailedBalance
        } else {
            Self::Eigensystems
        }
    }
}

/// Diagonalized Liouvillian output: one eigensystem per manifold pair, or a
/// single one for the whole truncated space.
#[derive(Clone, Debug)]
pub enum EigenArtifacts {
    ByManifold(IndexMap<ManifoldKey, Eigensystem>),
    Full(Eigensystem),
}

/// Everything a run persists for downstream consumers.
#[derive(Clone, Debug)]
pub struct RunArtifacts {
    pub eigensystems: Option<EigenArtifacts>,
    pub dipoles: Option<DipoleSet>,
    pub liouvillians: Option<IndexMap<ManifoldKey, nd::Array2<C64>>>,
    pub rho0: nd::Array1<C64>,
    pub timings: Timings,
}

/// The fully constructed vibronic model.
#[derive(Clone, Debug)]
pub struct VibronicSystem {
    polymer: Polymer,
    vibrations: VibrationalSpace,
    rates: DissipationRates,
    max_manifold: usize,
    manifolds_separable: bool,
    electronic_subspace: Option<Vec<usize>>,
    electronic_occupation: nd::Array1<f64>,
    vibronic_occupation: nd::Array1<f64>,
    total_hamiltonian: nd::Array2<C64>,
    h_eigenvalues: Vec<nd::Array1<f64>>,
    h_eigenvectors: Vec<nd::Array2<C64>>,
    condon_mu: [nd::Array2<C64>; 3],
    electronic_instructions: Vec<LindbladInstruction>,
    h_diagonalization_time: f64,
}

impl VibronicSystem {
    /// Build every operator of the model from a parsed configuration and an
    /// oscillator primitive.
    pub fn build(config: &SystemConfig, oscillator: &dyn Oscillator)
        -> VibronicResult<Self>
    {
        let polymer = Polymer::new(
            config.site_energies.clone(),
            config.site_couplings.iter().copied().map(C64::from).collect(),
            config.dipoles.clone(),
        )?;
        let rates = config.rates.clone();
        let max_manifold = config.max_manifold();
        let manifolds_separable = rates.optical_decoherence == 0.0;

        let electronic_subspace = if manifolds_separable {
            None
        } else {
            Some(polymer.subspace_mask(0, max_manifold))
        };
        let subspace = electronic_subspace.as_deref();

        let modes = config.modes();
        let vibrations = VibrationalSpace::new(
            &polymer,
            &modes,
            config.truncation_size,
            oscillator,
            config.mask_by_occupation,
            subspace,
        )?;

        let electronic_occupation: nd::Array1<f64> = match subspace {
            Some(inds) => {
                inds.iter().map(|&i| polymer.total_occupation()[i]).collect()
            },
            None => polymer.total_occupation().clone(),
        };
        let vibronic_occupation = kron_vec(
            &electronic_occupation,
            &nd::Array1::ones(vibrations.dim()),
        );

        let e_ham = match subspace {
            Some(inds) => gather(polymer.hamiltonian(), inds, inds),
            None => polymer.hamiltonian().clone(),
        };
        let mut total_hamiltonian = kron(&e_ham, vibrations.identity());
        if vibrations.num_modes() > 0 {
            total_hamiltonian
                = total_hamiltonian + vibrations.hamiltonian_terms();
        }

        let condon_mu = {
            let mut mus = Vec::with_capacity(3);
            for axis in 0..3 {
                let mu_e = match subspace {
                    Some(inds) => gather(polymer.mu(axis), inds, inds),
                    None => polymer.mu(axis).clone(),
                };
                mus.push(kron(&mu_e, vibrations.identity()));
            }
            let [x, y, z]: [nd::Array2<C64>; 3]
                = mus.try_into()
                .expect("build: exactly three polarizations");
            [x, y, z]
        };

        let electronic_instructions = liouvillian::promote_instructions(
            &dissipation::electronic_dissipation_instructions(
                &polymer, &rates),
            vibrations.identity(),
            subspace,
        );

        let t0 = Instant::now();
        let mut h_eigenvalues = Vec::with_capacity(max_manifold + 1);
        let mut h_eigenvectors = Vec::with_capacity(max_manifold + 1);
        for m in 0..=max_manifold {
            let inds = manifold_indices(&vibronic_occupation, m);
            let h = gather(&total_hamiltonian, &inds, &inds);
            let (e, mut v) = h.eigh(UPLO::Lower)?;
            for i in 0..e.len() {
                let col = v.column(i);
                let max_index = col.iter().enumerate()
                    .max_by(|(_, a), (_, b)| {
                        a.norm().partial_cmp(&b.norm())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(k, _)| k)
                    .unwrap_or(0);
                if col[max_index].re < 0.0 {
                    v.column_mut(i).mapv_inplace(|z| -z);
                }
            }
            h_eigenvalues.push(e);
            h_eigenvectors.push(v);
        }
        let h_diagonalization_time = t0.elapsed().as_secs_f64();

        Ok(Self {
            polymer,
            vibrations,
            rates,
            max_manifold,
            manifolds_separable,
            electronic_subspace,
            electronic_occupation,
            vibronic_occupation,
            total_hamiltonian,
            h_eigenvalues,
            h_eigenvectors,
            condon_mu,
            electronic_instructions,
            h_diagonalization_time,
        })
    }

    /// The underlying electronic model.
    pub fn polymer(&self) -> &Polymer { &self.polymer }

    /// The combined vibrational space.
    pub fn vibrations(&self) -> &VibrationalSpace { &self.vibrations }

    /// The dissipation rates in effect.
    pub fn rates(&self) -> &DissipationRates { &self.rates }

    /// Highest excitation manifold kept.
    pub fn max_manifold(&self) -> usize { self.max_manifold }

    /// `true` when no dissipator couples different excitation manifolds, so
    /// the Liouvillian is block-diagonal in (ket, bra) manifold pairs.
    pub fn manifolds_separable(&self) -> bool { self.manifolds_separable }

    /// The total vibronic Hamiltonian.
    pub fn total_hamiltonian(&self) -> &nd::Array2<C64> {
        &self.total_hamiltonian
    }

    /// Hilbert-space dimension of one vibronic manifold.
    pub fn manifold_dim(&self, manifold: usize) -> usize {
        self.h_eigenvalues[manifold].len()
    }

    /// Eigenvalues of the Hamiltonian restricted to one manifold, ascending.
    pub fn h_eigenvalues(&self, manifold: usize) -> &nd::Array1<f64> {
        &self.h_eigenvalues[manifold]
    }

    /// Eigenvectors of the Hamiltonian restricted to one manifold.
    pub fn h_eigenvectors(&self, manifold: usize) -> &nd::Array2<C64> {
        &self.h_eigenvectors[manifold]
    }

    /// Basis indices of the vibronic space belonging to one manifold.
    pub fn vibronic_manifold_mask(&self, manifold: usize) -> Vec<usize> {
        manifold_indices(&self.vibronic_occupation, manifold)
    }

    /// The Condon dipole operator along one polarization axis.
    pub fn condon_mu(&self, axis: usize) -> &nd::Array2<C64> {
        &self.condon_mu[axis]
    }

    /// Every generator instruction of the model: promoted electronic
    /// dissipation, the Hamiltonian commutator, and thermal vibrational
    /// relaxation.
    pub fn all_instructions(&self) -> Vec<LindbladInstruction> {
        let mut out = self.electronic_instructions.clone();
        out.extend(dissipation::commutator_instructions(
            &self.total_hamiltonian.mapv(|z| -C64::i() * z)));
        if self.rates.vibrational_relaxation != 0.0 {
            out.extend(self.vibrations.thermal_instructions(
                self.rates.vibrational_relaxation, self.rates.kt));
        }
        out
    }

    /// One assembled Liouvillian block per (ket, bra) manifold pair.
    ///
    /// Exact only when manifolds are separable.
    pub fn liouvillian_blocks(&self)
        -> IndexMap<ManifoldKey, nd::Array2<C64>>
    {
        let instructions = self.all_instructions();
        let mut blocks = IndexMap::new();
        for ket in 0..=self.max_manifold {
            let ket_inds = self.vibronic_manifold_mask(ket);
            for bra in 0..=self.max_manifold {
                let bra_inds = self.vibronic_manifold_mask(bra);
                let restricted = liouvillian::restrict_instructions(
                    &instructions, &ket_inds, &bra_inds, None, None);
                blocks.insert(
                    ManifoldKey::new(ket, bra),
                    liouvillian::assemble(&restricted),
                );
            }
        }
        blocks
    }

    /// The Liouvillian on the whole truncated space, for non-separable
    /// manifolds.
    pub fn liouvillian_full(&self) -> nd::Array2<C64> {
        liouvillian::assemble(&self.all_instructions())
    }

    /// Liouvillian blocks in the per-manifold Hamiltonian eigenbasis with
    /// all dissipation replaced by eigenstate decoherence rates that satisfy
    /// detailed balance exactly.
    pub fn detailed_balance_blocks(&self)
        -> VibronicResult<IndexMap<ManifoldKey, nd::Array2<C64>>>
    {
        let commutator = dissipation::commutator_instructions(
            &self.total_hamiltonian.mapv(|z| -C64::i() * z));
        let rates_by_manifold: Vec<nd::Array2<f64>>
            = (0..=self.max_manifold)
            .map(|m| self.total_decoherence_rates(m))
            .collect();

        let mut blocks = IndexMap::new();
        for ket in 0..=self.max_manifold {
            let ket_inds = self.vibronic_manifold_mask(ket);
            for bra in 0..=self.max_manifold {
                let bra_inds = self.vibronic_manifold_mask(bra);
                let key = ManifoldKey::new(ket, bra);
                let restricted = liouvillian::restrict_instructions(
                    &commutator,
                    &ket_inds,
                    &bra_inds,
                    Some(&self.h_eigenvectors[ket]),
                    Some(&self.h_eigenvectors[bra]),
                );
                let mut l = liouvillian::assemble(&restricted);
                l = l + self.eigenstate_decoherence_block(
                    &rates_by_manifold[ket], &rates_by_manifold[bra], key);
                if !key.is_diagonal()
                    && self.rates.optical_dephasing != 0.0
                {
                    l = l + self.eigenstate_optical_dephasing_block(key)?;
                }
                blocks.insert(key, l);
            }
        }
        Ok(blocks)
    }

    /// Produce the outputs of one run.
    pub fn run(&self, mode: RunMode) -> VibronicResult<RunArtifacts> {
        match mode {
            RunMode::Eigensystems if self.manifolds_separable => {
                let t0 = Instant::now();
                let blocks = self.liouvillian_blocks();
                let l_construction = t0.elapsed().as_secs_f64();

                let t0 = Instant::now();
                let mut eigensystems = IndexMap::new();
                for (key, l) in blocks.iter() {
                    eigensystems.insert(*key, eigen::eigensystem(l)?);
                }
                let l_diagonalization = t0.elapsed().as_secs_f64();

                let dipoles = self.dipole_set(false, Some(&eigensystems));
                Ok(RunArtifacts {
                    eigensystems:
                        Some(EigenArtifacts::ByManifold(eigensystems)),
                    dipoles: Some(dipoles),
                    liouvillians: None,
                    rho0: self.thermal_density(false),
                    timings: Timings {
                        h_diagonalization: self.h_diagonalization_time,
                        l_construction,
                        l_diagonalization,
                    },
                })
            },
            RunMode::Eigensystems => {
                let t0 = Instant::now();
                let l = self.liouvillian_full();
                let l_construction = t0.elapsed().as_secs_f64();

                let t0 = Instant::now();
                let eig = eigen::eigensystem(&l)?;
                let l_diagonalization = t0.elapsed().as_secs_f64();

                Ok(RunArtifacts {
                    eigensystems: Some(EigenArtifacts::Full(eig)),
                    dipoles: None,
                    liouvillians: None,
                    rho0: self.thermal_density(false),
                    timings: Timings {
                        h_diagonalization: self.h_diagonalization_time,
                        l_construction,
                        l_diagonalization,
                    },
                })
            },
            RunMode::DetailedBalance => {
                let t0 = Instant::now();
                let blocks = self.detailed_balance_blocks()?;
                let l_construction = t0.elapsed().as_secs_f64();

                let t0 = Instant::now();
                let mut eigensystems = IndexMap::new();
                for (key, l) in blocks.iter() {
                    let pop_size = key.is_diagonal()
                        .then(|| self.manifold_dim(key.ket));
                    eigensystems.insert(
                        *key,
                        eigen::eigensystem_populations(l, pop_size, false)?,
                    );
                }
                let l_diagonalization = t0.elapsed().as_secs_f64();

                let dipoles = self.dipole_set(true, Some(&eigensystems));
                Ok(RunArtifacts {
                    eigensystems:
                        Some(EigenArtifacts::ByManifold(eigensystems)),
                    dipoles: Some(dipoles),
                    liouvillians: None,
                    rho0: self.thermal_density(true),
                    timings: Timings {
                        h_diagonalization: self.h_diagonalization_time,
                        l_construction,
                        l_diagonalization,
                    },
                })
            },
            RunMode::Propagation { detailed_balance } => {
                if !self.manifolds_separable {
                    return Err(VibronicError::ConfigInvalid(
                        "propagation outputs require separable manifolds"
                            .into()));
                }
                let t0 = Instant::now();
                let blocks = if detailed_balance {
                    self.detailed_balance_blocks()?
                } else {
                    self.liouvillian_blocks()
                };
                let l_construction = t0.elapsed().as_secs_f64();

                let dipoles = self.dipole_set(detailed_balance, None);
                Ok(RunArtifacts {
                    eigensystems: None,
                    dipoles: Some(dipoles),
                    liouvillians: Some(blocks),
                    rho0: self.thermal_density(detailed_balance),
                    timings: Timings {
                        h_diagonalization: self.h_diagonalization_time,
                        l_construction,
                        l_diagonalization: 0.0,
                    },
                })
            },
        }
    }

    /// The thermal equilibrium state of the ground manifold as a vectorized
    /// density matrix: Boltzmann populations of the ground-manifold
    /// Hamiltonian eigenvalues, rotated back to the site basis unless the
    /// blocks themselves live in the Hamiltonian eigenbasis.
    pub fn thermal_density(&self, h_eigentransform: bool) -> nd::Array1<C64> {
        let e0 = &self.h_eigenvalues[0];
        let size = e0.len();
        let mut rho0 = nd::Array2::<C64>::zeros((size, size));
        if size == 1 || self.rates.kt == 0.0 {
            rho0[[0, 0]] = 1.0.into();
        } else {
            let z: f64 = e0.iter().map(|e| (-e / self.rates.kt).exp()).sum();
            for (k, e) in e0.iter().enumerate() {
                rho0[[k, k]] = C64::from((-e / self.rates.kt).exp() / z);
            }
        }
        if !h_eigentransform {
            let v = &self.h_eigenvectors[0];
            rho0 = v.dot(&rho0).dot(&dagger(v));
        }
        rho0.iter().copied().collect()
    }

    /// Build every adjacent-manifold dipole block. `eigensystems`, when
    /// given, transforms each block by the left/right eigenvectors of the
    /// destination and source Liouvillian blocks.
    pub fn dipole_set(
        &self,
        h_eigentransform: bool,
        eigensystems: Option<&IndexMap<ManifoldKey, Eigensystem>>,
    ) -> DipoleSet
    {
        let mut out = DipoleSet::default();
        for ket in 0..=self.max_manifold {
            for bra in 0..=self.max_manifold {
                let old = ManifoldKey::new(ket, bra);
                for (change, ket_side) in
                    [(1, true), (-1, true), (1, false), (-1, false)]
                {
                    if let Some((key, block)) = self.dipole_block(
                        old, change, ket_side, h_eigentransform, eigensystems)
                    {
                        out.insert(key, block);
                    }
                }
            }
        }
        out
    }

    fn dipole_block(
        &self,
        old: ManifoldKey,
        change: i64,
        ket_side: bool,
        h_eigentransform: bool,
        eigensystems: Option<&IndexMap<ManifoldKey, Eigensystem>>,
    ) -> Option<(DipoleKey, DipoleBlock)>
    {
        let moved = if ket_side { old.ket } else { old.bra } as i64 + change;
        if moved < 0 || moved > self.max_manifold as i64 {
            return None;
        }
        let moved = moved as usize;
        let new = if ket_side {
            ManifoldKey::new(moved, old.bra)
        } else {
            ManifoldKey::new(old.ket, moved)
        };

        let mut components = Vec::with_capacity(3);
        for axis in 0..3 {
            let mu_full = &self.condon_mu[axis];
            let mut sup = if ket_side {
                let rows = self.vibronic_manifold_mask(moved);
                let cols = self.vibronic_manifold_mask(old.ket);
                let mut mu = gather(mu_full, &rows, &cols);
                if h_eigentransform {
                    mu = dagger(&self.h_eigenvectors[moved])
                        .dot(&mu)
                        .dot(&self.h_eigenvectors[old.ket]);
                }
                dipole::ket_superoperator(&mu, self.manifold_dim(old.bra))
            } else {
                let rows = self.vibronic_manifold_mask(old.bra);
                let cols = self.vibronic_manifold_mask(moved);
                let mut mu = gather(mu_full, &rows, &cols);
                if h_eigentransform {
                    mu = dagger(&self.h_eigenvectors[old.bra])
                        .dot(&mu)
                        .dot(&self.h_eigenvectors[moved]);
                }
                dipole::bra_superoperator(&mu, self.manifold_dim(old.ket))
            };
            if let Some(eigs) = eigensystems {
                let left = &eigs[&new].left;
                let right = &eigs[&old].right;
                sup = left.dot(&sup).dot(right);
            }
            components.push(sup);
        }
        let [x, y, z]: [nd::Array2<C64>; 3] = components.try_into()
            .expect("dipole_block: exactly three polarizations");
        Some((
            DipoleKey { from: old, to: new },
            dipole::block_from_components([x, y, z]),
        ))
    }

    /// Indices of the masked vibrational space where `mode` carries exactly
    /// `occupation` quanta, repeated over the electronic states of one
    /// manifold.
    pub fn vibrational_occupation_indices(
        &self,
        mode: usize,
        occupation: usize,
        manifold: usize,
    ) -> Vec<usize>
    {
        let labels = self.vibrations.mode_occupation(mode);
        let elec_size = self.electronic_manifold_size(manifold);
        let repeated = kron_vec(&nd::Array1::ones(elec_size), &labels);
        repeated.iter().enumerate()
            .filter(|(_, occ)| (**occ - occupation as f64).abs() < 0.5)
            .map(|(k, _)| k)
            .collect()
    }

    /// Indices of one vibronic manifold where `site` is electronically
    /// occupied.
    pub fn electronic_occupation_indices(&self, site: usize, manifold: usize)
        -> Vec<usize>
    {
        let n = self.polymer.num_sites();
        let ladder = nd::array![0.0, 1.0];
        let full = crate::tensor::occupation_vector(n, 2, site, &ladder);
        let used: nd::Array1<f64> = match self.electronic_subspace.as_deref() {
            Some(inds) => inds.iter().map(|&i| full[i]).collect(),
            None => full,
        };
        let mask = manifold_indices(&self.electronic_occupation, manifold);
        let restricted: nd::Array1<f64>
            = mask.iter().map(|&i| used[i]).collect();
        let repeated = kron_vec(
            &restricted, &nd::Array1::ones(self.vibrations.dim()));
        repeated.iter().enumerate()
            .filter(|(_, occ)| (**occ - 1.0).abs() < 0.5)
            .map(|(k, _)| k)
            .collect()
    }

    fn electronic_manifold_size(&self, manifold: usize) -> usize {
        manifold_indices(&self.electronic_occupation, manifold).len()
    }

    /// Downward vibrational relaxation overlap rates between the eigenstates
    /// of one manifold: for each eigenpair `(i, j)` with `j > i`, the summed
    /// single-quantum ladder overlaps `|v_i(k)|² |v_j(k+1)|² √(k+1)` over
    /// every mode.
    pub fn vibrational_decoherence_rates(&self, manifold: usize)
        -> nd::Array2<f64>
    {
        let size = self.manifold_dim(manifold);
        let v = &self.h_eigenvectors[manifold];
        let mut rates = nd::Array2::zeros((size, size));
        for mode in 0..self.vibrations.num_modes() {
            let index_ladders: Vec<Vec<usize>>
                = (0..=self.vibrations.truncation())
                .map(|k| {
                    self.vibrational_occupation_indices(mode, k, manifold)
                })
                .collect();
            for i in 0..size {
                for j in (i + 1)..size {
                    let vi = v.column(i);
                    let vj = v.column(j);
                    let mut rate = 0.0;
                    for k in 0..self.vibrations.truncation() {
                        for (&ki, &kp1i) in
                            index_ladders[k].iter()
                            .zip(index_ladders[k + 1].iter())
                        {
                            rate += vi[ki].norm_sqr()
                                * vj[kp1i].norm_sqr()
                                * ((k + 1) as f64).sqrt();
                        }
                    }
                    rates[[i, j]] += rate;
                }
            }
        }
        rates
    }

    /// Electronic site-pair overlap rates between the eigenstates of one
    /// manifold, treating every energetically ordered site pair alike.
    pub fn electronic_decoherence_rates(&self, manifold: usize)
        -> nd::Array2<f64>
    {
        let size = self.manifold_dim(manifold);
        let v = &self.h_eigenvectors[manifold];
        let energies = self.polymer.energies();
        let n = energies.len();
        let site_indices: Vec<Vec<usize>> = (0..n)
            .map(|a| self.electronic_occupation_indices(a, manifold))
            .collect();
        let mut rates = nd::Array2::zeros((size, size));
        for i in 0..size {
            for j in (i + 1)..size {
                let vi = v.column(i);
                let vj = v.column(j);
                for a in 0..n {
                    for b in 0..n {
                        if energies[b] <= energies[a] { continue; }
                        let wa: f64 = site_indices[a].iter()
                            .map(|&k| vi[k].norm_sqr())
                            .sum();
                        let wb: f64 = site_indices[b].iter()
                            .map(|&k| vj[k].norm_sqr())
                            .sum();
                        rates[[i, j]] += wa * wb;
                    }
                }
            }
        }
        rates
    }

    /// Combined eigenstate decoherence rates of one manifold.
    pub fn total_decoherence_rates(&self, manifold: usize)
        -> nd::Array2<f64>
    {
        let mut rates = self.vibrational_decoherence_rates(manifold)
            .mapv(|r| r * self.rates.vibrational_relaxation);
        if self.rates.site_to_site_decoherence != 0.0 {
            rates = rates
                + self.electronic_decoherence_rates(manifold)
                .mapv(|r| r * self.rates.site_to_site_decoherence);
        }
        rates
    }

    /// Direct Lindblad block for eigenstate decoherence at the given rates.
    ///
    /// On a population block the population subspace carries the full
    /// gain/loss structure and every coherence picks up half the summed
    /// damping of its two indices; on a coherence block only the damping
    /// survives.
    fn eigenstate_decoherence_block(
        &self,
        ket_rates: &nd::Array2<f64>,
        bra_rates: &nd::Array2<f64>,
        key: ManifoldKey,
    ) -> nd::Array2<C64>
    {
        let kt = self.rates.kt;
        if key.is_diagonal() {
            let e = &self.h_eigenvalues[key.ket];
            let size = e.len();
            let mut pop = nd::Array2::<f64>::zeros((size, size));
            let mut diagonal = nd::Array2::<f64>::zeros((size, size));
            for i in 0..size {
                for j in (i + 1)..size {
                    let (down, up) = boltzmann(kt, e[i], e[j]);
                    let down = down * ket_rates[[i, j]];
                    let up = up * ket_rates[[i, j]];

                    pop[[j, j]] += -0.5 * down;
                    pop[[i, j]] += 0.5 * down;
                    pop[[i, i]] += -0.5 * up;
                    pop[[j, i]] += 0.5 * up;

                    for k in 0..size {
                        diagonal[[j, k]] += -0.25 * down;
                        diagonal[[k, j]] += -0.25 * down;
                        diagonal[[i, k]] += -0.25 * up;
                        diagonal[[k, i]] += -0.25 * up;
                    }
                    diagonal[[j, j]] += -0.5 * down;
                    diagonal[[i, i]] += -0.5 * up;
                }
            }
            let mut total = nd::Array2::<C64>::zeros((size * size, size * size));
            for (r, d) in diagonal.iter().enumerate() {
                total[[r, r]] = C64::from(*d);
            }
            let pop_inds: Vec<usize>
                = (0..size).map(|i| i * (size + 1)).collect();
            for (row, &r) in pop_inds.iter().enumerate() {
                for (col, &c) in pop_inds.iter().enumerate() {
                    total[[r, c]] = C64::from(pop[[row, col]]);
                }
            }
            total
        } else {
            let e_ket = &self.h_eigenvalues[key.ket];
            let e_bra = &self.h_eigenvalues[key.bra];
            let (ket_size, bra_size) = (e_ket.len(), e_bra.len());
            let mut diagonal
                = nd::Array2::<f64>::zeros((ket_size, bra_size));
            for i in 0..ket_size {
                for j in (i + 1)..ket_size {
                    let (down, up) = boltzmann(kt, e_ket[i], e_ket[j]);
                    let down = down * ket_rates[[i, j]];
                    let up = up * ket_rates[[i, j]];
                    for c in 0..bra_size {
                        diagonal[[j, c]] += -0.25 * down;
                        diagonal[[i, c]] += -0.25 * up;
                    }
                }
            }
            for i in 0..bra_size {
                for j in (i + 1)..bra_size {
                    let (down, up) = boltzmann(kt, e_bra[i], e_bra[j]);
                    let down = down * bra_rates[[i, j]];
                    let up = up * bra_rates[[i, j]];
                    for r in 0..ket_size {
                        diagonal[[r, j]] += -0.25 * down;
                        diagonal[[r, i]] += -0.25 * up;
                    }
                }
            }
            let dim = ket_size * bra_size;
            let mut total = nd::Array2::<C64>::zeros((dim, dim));
            for (r, d) in diagonal.iter().enumerate() {
                total[[r, r]] = C64::from(*d);
            }
            total
        }
    }

    /// Flat optical dephasing on a coherence block: the electronic dephasing
    /// superoperator carries one uniform rate per manifold pair, which fills
    /// the block diagonal.
    fn eigenstate_optical_dephasing_block(&self, key: ManifoldKey)
        -> VibronicResult<nd::Array2<C64>>
    {
        let instructions = dissipation::optical_dephasing_instructions(
            &self.polymer, self.rates.optical_dephasing);
        let l_elec = liouvillian::assemble(&instructions);
        let e_dim = self.polymer.dim();
        let ket_mask = self.polymer.manifold_mask(key.ket);
        let bra_mask = self.polymer.manifold_mask(key.bra);
        let mut values = Vec::with_capacity(ket_mask.len() * bra_mask.len());
        for &r in ket_mask.iter() {
            for &c in bra_mask.iter() {
                values.push(l_elec[[r * e_dim + c, r * e_dim + c]]);
            }
        }
        let first = values[0];
        if values.iter().any(|v| (v - first).norm() > 1e-8) {
            return Err(VibronicError::Consistency(
                "optical dephasing rates differ across one coherence block"
                    .into()));
        }
        let dim = self.manifold_dim(key.ket) * self.manifold_dim(key.bra);
        let mut out = nd::Array2::<C64>::zeros((dim, dim));
        for r in 0..dim {
            out[[r, r]] = first;
        }
        Ok(out)
    }
}

/// Build, run, and return both the model and its outputs.
pub fn execute(config: &SystemConfig, oscillator: &dyn Oscillator)
    -> VibronicResult<(VibronicSystem, RunArtifacts)>
{
    let system = VibronicSystem::build(config, oscillator)?;
    let artifacts = system.run(RunMode::from_config(config))?;
    Ok((system, artifacts))
}

fn manifold_indices(occupation: &nd::Array1<f64>, manifold: usize)
    -> Vec<usize>
{
    occupation.iter().enumerate()
        .filter(|(_, occ)| (**occ - manifold as f64).abs() < 0.5)
        .map(|(k, _)| k)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oscillator::DisplacedOscillator;

    fn monomer_config() -> SystemConfig {
        SystemConfig::from_toml(r#"
site_energies = [1.0]
site_couplings = []
dipoles = [[1.0, 0.0, 0.0]]
truncation_size = 1

[rates]
optical_dephasing = 0.1
exciton_exciton_dephasing = 0.0
vibrational_relaxation = 0.0
kt = 1.0
"#).unwrap()
    }

    fn dimer_config() -> SystemConfig {
        SystemConfig::from_toml(r#"
site_energies = [1.0, 1.0]
site_couplings = [0.5]
dipoles = [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]
truncation_size = 3

[rates]
optical_dephasing = 0.1
exciton_exciton_dephasing = 0.01
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
    fn monomer_dephasing_scenario() {
        let config = monomer_config();
        let (system, artifacts)
            = execute(&config, &DisplacedOscillator).unwrap();
        // electronic Hamiltonian is diag(0, 1) and there are no vibrations
        let h = system.total_hamiltonian();
        assert_eq!(h.dim(), (2, 2));
        assert!((h[[0, 0]].re - 0.0).abs() < 1e-12);
        assert!((h[[1, 1]].re - 1.0).abs() < 1e-12);

        let eigs = match artifacts.eigensystems.as_ref().unwrap() {
            EigenArtifacts::ByManifold(map) => map,
            EigenArtifacts::Full(_) => panic!("expected manifold blocks"),
        };
        // coherence blocks decay, population blocks are stationary
        let coh = &eigs[&ManifoldKey::new(0, 1)];
        for v in coh.eigenvalues.iter() {
            assert!(v.re < 0.0);
        }
        let pop = &eigs[&ManifoldKey::new(1, 1)];
        assert!(pop.eigenvalues.iter().any(|v| *v == C64::from(0.0)));
    }

    #[test]
    fn dimer_manifold_sizes_follow_the_masks() {
        let config = dimer_config();
        let system
            = VibronicSystem::build(&config, &DisplacedOscillator).unwrap();
        // one mode, truncation 3: vibrational dim 3; manifolds 1, 2, 1 of
        // electronic states times the vibrational factor
        assert_eq!(system.vibrations().dim(), 3);
        assert_eq!(system.manifold_dim(0), 3);
        assert_eq!(system.manifold_dim(1), 6);
        assert_eq!(system.manifold_dim(2), 3);
    }

    #[test]
    fn separable_blocks_cover_every_manifold_pair() {
        let config = dimer_config();
        let system
            = VibronicSystem::build(&config, &DisplacedOscillator).unwrap();
        assert!(system.manifolds_separable());
        let blocks = system.liouvillian_blocks();
        assert_eq!(blocks.len(), 9);
        let block = &blocks[&ManifoldKey::new(1, 0)];
        assert_eq!(block.dim(), (18, 18));
    }

    #[test]
    fn steady_state_of_population_block_is_thermal() {
        let config = dimer_config();
        let (system, artifacts)
            = execute(&config, &DisplacedOscillator).unwrap();
        let eigs = match artifacts.eigensystems.as_ref().unwrap() {
            EigenArtifacts::ByManifold(map) => map,
            EigenArtifacts::Full(_) => panic!("expected manifold blocks"),
        };
        let ground = &eigs[&ManifoldKey::new(0, 0)];
        let zero_cols: Vec<usize>
            = ground.eigenvalues.iter().enumerate()
            .filter(|(_, v)| **v == C64::from(0.0))
            .map(|(k, _)| k)
            .collect();
        assert!(!zero_cols.is_empty());
        let dim = system.manifold_dim(0);
        for &i in zero_cols.iter() {
            let trace: C64 = (0..dim)
                .map(|k| ground.right[[k * (dim + 1), i]])
                .sum();
            assert!((trace - C64::from(1.0)).norm() < 1e-8);
        }
    }

    #[test]
    fn thermal_density_is_normalized() {
        let config = dimer_config();
        let system
            = VibronicSystem::build(&config, &DisplacedOscillator).unwrap();
        for h_eig in [false, true] {
            let rho0 = system.thermal_density(h_eig);
            let dim = system.manifold_dim(0);
            assert_eq!(rho0.len(), dim * dim);
            let trace: C64 = (0..dim).map(|k| rho0[k * (dim + 1)]).sum();
            assert!((trace - C64::from(1.0)).norm() < 1e-10);
        }
    }

    #[test]
    fn dipole_blocks_connect_adjacent_manifolds_only() {
        let config = dimer_config();
        let (_, artifacts) = execute(&config, &DisplacedOscillator).unwrap();
        let dipoles = artifacts.dipoles.as_ref().unwrap();
        for key in dipoles.keys() {
            let dk = key.to.ket as i64 - key.from.ket as i64;
            let db = key.to.bra as i64 - key.from.bra as i64;
            assert_eq!(dk.abs() + db.abs(), 1);
        }
        // ground block can only be raised, on either side
        assert!(dipoles.contains_key(&DipoleKey {
            from: ManifoldKey::new(0, 0),
            to: ManifoldKey::new(1, 0),
        }));
        assert!(dipoles.contains_key(&DipoleKey {
            from: ManifoldKey::new(0, 0),
            to: ManifoldKey::new(0, 1),
        }));
    }

    #[test]
    fn detailed_balance_blocks_have_thermal_populations() {
        let mut config = dimer_config();
        config.force_detailed_balance = true;
        let (_system, artifacts)
            = execute(&config, &DisplacedOscillator).unwrap();
        let eigs = match artifacts.eigensystems.as_ref().unwrap() {
            EigenArtifacts::ByManifold(map) => map,
            EigenArtifacts::Full(_) => panic!("expected manifold blocks"),
        };
        // the singly-excited population block relaxes toward a steady state
        let block = &eigs[&ManifoldKey::new(1, 1)];
        let zeros = block.eigenvalues.iter()
            .filter(|v| **v == C64::from(0.0))
            .count();
        assert!(zeros >= 1);
        assert!(block.eigenvalues.iter().all(|v| v.re <= 1e-12));
    }

    #[test]
    fn propagation_mode_keeps_liouvillians_and_site_dipoles() {
        let mut config = dimer_config();
        config.for_propagation = true;
        let (system, artifacts)
            = execute(&config, &DisplacedOscillator).unwrap();
        assert!(artifacts.eigensystems.is_none());
        let ls = artifacts.liouvillians.as_ref().unwrap();
        assert_eq!(
            ls.len(),
            (system.max_manifold() + 1) * (system.max_manifold() + 1),
        );
        assert!(artifacts.dipoles.is_some());
    }

    #[test]
    fn nonseparable_manifolds_fall_back_to_the_full_space() {
        let mut config = dimer_config();
        config.rates.optical_decoherence = 0.05;
        let (system, artifacts)
            = execute(&config, &DisplacedOscillator).unwrap();
        assert!(!system.manifolds_separable());
        match artifacts.eigensystems.as_ref().unwrap() {
            EigenArtifacts::Full(eig) => {
                let dim = system.total_hamiltonian().nrows();
                assert_eq!(eig.right.dim(), (dim * dim, dim * dim));
            },
            EigenArtifacts::ByManifold(_) => {
                panic!("expected a full-space eigensystem");
            },
        }
        assert!(artifacts.dipoles.is_none());
    }
}
