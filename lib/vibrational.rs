//! Vibrational modes: truncated anharmonic ladders, occupation-number
//! masking, and conditioning on the owning site's electronic occupation.
//!
//! Each mode carries two surfaces, one per electronic occupation of its site
//! (Condon/displaced-oscillator model). Mode operators are Kronecker-combined
//! across the configured mode positions, masked down to total vibrational
//! occupation below the truncation size, and only then combined with the
//! site's empty/occupied projector.

use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use crate::{
    dissipation::{ lindblad, LindbladInstruction },
    electronic::Polymer,
    error::VibronicResult,
    oscillator::{ Oscillator, OscillatorParams },
    tensor::{ self, gather },
};

/// One configured vibrational mode.
#[derive(Clone, Debug, PartialEq)]
pub struct Mode {
    /// Ground-surface frequency; all mode energies scale with it.
    pub frequency: f64,
    /// Index of the electronic site the mode belongs to.
    pub site: usize,
    /// Surface shape when the site is unoccupied.
    pub ground: OscillatorParams,
    /// Surface shape when the site is occupied.
    pub excited: OscillatorParams,
}

/// The combined vibrational factor space and its electronically conditioned
/// operators.
#[derive(Clone, Debug)]
pub struct VibrationalSpace {
    truncation: usize,
    num_modes: usize,
    frequencies: Vec<f64>,
    matched_surfaces: Vec<bool>,
    mask: Vec<usize>,
    identity: nd::Array2<C64>,
    empty_hamiltonians: Vec<nd::Array2<C64>>,
    occupied_hamiltonians: Vec<nd::Array2<C64>>,
    empty_raisings: Vec<nd::Array2<C64>>,
    occupied_raisings: Vec<nd::Array2<C64>>,
}

impl VibrationalSpace {
    /// Build every conditioned mode operator.
    ///
    /// `electronic_subspace`, when given, restricts the electronic projectors
    /// to the listed basis indices before combination (used when manifolds
    /// are not separable). `mask_by_occupation` applies the
    /// total-quantum-number truncation mask; it must be applied to every
    /// vibrational operator or none.
    pub fn new(
        polymer: &Polymer,
        modes: &[Mode],
        truncation: usize,
        oscillator: &dyn Oscillator,
        mask_by_occupation: bool,
        electronic_subspace: Option<&[usize]>,
    ) -> VibronicResult<Self>
    {
        let nv = modes.len();
        let k = truncation;

        let mask: Vec<usize> = if mask_by_occupation && nv > 0 {
            tensor::total_occupation(nv, k).iter().enumerate()
                .filter(|(_, occ)| **occ < k as f64 - 0.5)
                .map(|(i, _)| i)
                .collect()
        } else {
            (0..k.pow(nv as u32)).collect()
        };
        let identity = nd::Array2::eye(mask.len());

        let mut empty_hamiltonians = Vec::with_capacity(nv);
        let mut occupied_hamiltonians = Vec::with_capacity(nv);
        let mut empty_raisings = Vec::with_capacity(nv);
        let mut occupied_raisings = Vec::with_capacity(nv);

        for (i, mode) in modes.iter().enumerate() {
            let empty_local = surface_hamiltonian(
                oscillator, k, mode.frequency, &mode.ground);
            let occupied_local = surface_hamiltonian(
                oscillator, k, mode.frequency, &mode.excited);
            let empty_up_local
                = displaced_raising(oscillator, k, &mode.ground);
            let occupied_up_local
                = displaced_raising(oscillator, k, &mode.excited);

            let empty_e = conditioned_projector(
                polymer.empty_list(), mode.site, electronic_subspace);
            let occupied_e = conditioned_projector(
                polymer.occupied_list(), mode.site, electronic_subspace);

            let place = |local: &nd::Array2<C64>| -> VibronicResult<_> {
                let full = tensor::insert_at(nv, k, &[(i, local)])?;
                Ok(gather(&full, &mask, &mask))
            };

            empty_hamiltonians.push(kron(&empty_e, &place(&empty_local)?));
            occupied_hamiltonians
                .push(kron(&occupied_e, &place(&occupied_local)?));
            empty_raisings.push(kron(&empty_e, &place(&empty_up_local)?));
            occupied_raisings
                .push(kron(&occupied_e, &place(&occupied_up_local)?));
        }

        let matched_surfaces = modes.iter()
            .map(|m| m.excited.potential.first().copied() == Some(1.0))
            .collect();
        let frequencies = modes.iter().map(|m| m.frequency).collect();

        Ok(Self {
            truncation,
            num_modes: nv,
            frequencies,
            matched_surfaces,
            mask,
            identity,
            empty_hamiltonians,
            occupied_hamiltonians,
            empty_raisings,
            occupied_raisings,
        })
    }

    /// Number of configured modes.
    pub fn num_modes(&self) -> usize { self.num_modes }

    /// Per-mode truncation size.
    pub fn truncation(&self) -> usize { self.truncation }

    /// Dimension of the (masked) combined vibrational space.
    pub fn dim(&self) -> usize { self.mask.len() }

    /// Identity on the masked vibrational space.
    pub fn identity(&self) -> &nd::Array2<C64> { &self.identity }

    /// Kept indices of the unmasked `K^nv` product space.
    pub fn mask(&self) -> &[usize] { &self.mask }

    /// Sum of all conditioned mode Hamiltonians; adding this to
    /// `kron(H_electronic, I_vib)` gives the total vibronic Hamiltonian.
    pub fn hamiltonian_terms(&self) -> nd::Array2<C64> {
        let dim = self.empty_hamiltonians.first()
            .map(|h| h.nrows())
            .unwrap_or(0);
        let mut total = nd::Array2::zeros((dim, dim));
        for (h0, h1) in
            self.empty_hamiltonians.iter()
            .zip(self.occupied_hamiltonians.iter())
        {
            total = total + h0 + h1;
        }
        total
    }

    /// Occupation number of the given mode for every kept index of the
    /// masked vibrational space.
    pub fn mode_occupation(&self, mode: usize) -> nd::Array1<f64> {
        let ladder: nd::Array1<f64>
            = (0..self.truncation).map(|n| n as f64).collect();
        let occ = tensor::occupation_vector(
            self.num_modes, self.truncation, mode, &ladder);
        self.mask.iter().map(|&i| occ[i]).collect()
    }

    /// Thermal ladder dissipation: per mode, downward jumps at
    /// `γ(N̄ + 1)` and upward jumps at `γN̄` with the Bose occupation
    /// `N̄ = 1/(e^{ω/kT} - 1)`, through the electronically conditioned
    /// displaced ladder.
    pub fn thermal_instructions(&self, gamma: f64, kt: f64)
        -> Vec<LindbladInstruction>
    {
        let mut out = Vec::new();
        for m in 0..self.num_modes {
            if !self.matched_surfaces[m] {
                log::warn!(
                    "different excited and ground surface frequencies are \
                    not properly handled by thermal dissipation");
            }
            let energy = self.frequencies[m];
            let nbar = if kt == 0.0 {
                0.0
            } else {
                ((energy / kt).exp() - 1.0).recip()
            };
            let o = (&self.occupied_raisings[m] + &self.empty_raisings[m])
                .t()
                .to_owned();
            out.extend(lindblad(gamma * (nbar + 1.0), &o));
            if nbar != 0.0 {
                out.extend(lindblad(gamma * nbar, &o.t().to_owned()));
            }
        }
        out
    }
}

/// `0.5 ω` times the primitive's dimensionless surface Hamiltonian.
fn surface_hamiltonian(
    oscillator: &dyn Oscillator,
    size: usize,
    frequency: f64,
    params: &OscillatorParams,
) -> nd::Array2<C64>
{
    oscillator.hamiltonian(size, params).mapv(|z| z * (0.5 * frequency))
}

/// The primitive's raising operator displaced by the surface minimum,
/// `a† - d/√2`.
fn displaced_raising(
    oscillator: &dyn Oscillator,
    size: usize,
    params: &OscillatorParams,
) -> nd::Array2<C64>
{
    oscillator.raising(size)
        - nd::Array2::<C64>::eye(size)
        * C64::from(params.displacement / 2.0_f64.sqrt())
}

fn conditioned_projector(
    projectors: &[nd::Array2<C64>],
    site: usize,
    electronic_subspace: Option<&[usize]>,
) -> nd::Array2<C64>
{
    let p = &projectors[site];
    match electronic_subspace {
        Some(inds) => gather(p, inds, inds),
        None => p.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oscillator::DisplacedOscillator;

    fn monomer() -> Polymer {
        Polymer::new(vec![1.0], vec![], vec![[1.0, 0.0, 0.0]]).unwrap()
    }

    fn harmonic_mode() -> Mode {
        Mode {
            frequency: 0.2,
            site: 0,
            ground: OscillatorParams::harmonic(),
            excited: OscillatorParams {
                displacement: 1.0,
                ..OscillatorParams::harmonic()
            },
        }
    }

    #[test]
    fn two_mode_mask_keeps_low_occupation() {
        let p = monomer();
        let modes = [harmonic_mode(), harmonic_mode()];
        let vib = VibrationalSpace::new(
            &p, &modes, 3, &DisplacedOscillator, true, None).unwrap();
        // pairs (n1, n2) with n1 + n2 < 3: 6 of 9
        assert_eq!(vib.dim(), 6);
        assert_eq!(vib.mask(), &[0, 1, 2, 3, 4, 6]);
    }

    #[test]
    fn unmasked_space_is_the_full_product() {
        let p = monomer();
        let modes = [harmonic_mode(), harmonic_mode()];
        let vib = VibrationalSpace::new(
            &p, &modes, 3, &DisplacedOscillator, false, None).unwrap();
        assert_eq!(vib.dim(), 9);
    }

    #[test]
    fn no_modes_leaves_a_scalar_factor() {
        let p = monomer();
        let vib = VibrationalSpace::new(
            &p, &[], 3, &DisplacedOscillator, true, None).unwrap();
        assert_eq!(vib.dim(), 1);
        assert_eq!(vib.identity(), &nd::Array2::<C64>::eye(1));
        assert!(vib.thermal_instructions(0.1, 1.0).is_empty());
    }

    #[test]
    fn conditioned_hamiltonians_live_on_their_surface() {
        let p = monomer();
        let modes = [harmonic_mode()];
        let vib = VibrationalSpace::new(
            &p, &modes, 4, &DisplacedOscillator, true, None).unwrap();
        let terms = vib.hamiltonian_terms();
        // dimension: 2 electronic x 4 vibrational
        assert_eq!(terms.nrows(), 8);
        // ground-surface block is harmonic: 0.5 w (2n + 1) on the diagonal
        for n in 0..3 {
            assert!(
                (terms[[n, n]].re - 0.5 * 0.2 * (2.0 * n as f64 + 1.0)).abs()
                    < 1e-12
            );
        }
        // excited-surface block sits in the occupied electronic sector
        assert!(terms[[4, 4]].re > 0.0);
    }

    #[test]
    fn mode_occupation_labels_follow_the_mask() {
        let p = monomer();
        let modes = [harmonic_mode(), harmonic_mode()];
        let vib = VibrationalSpace::new(
            &p, &modes, 3, &DisplacedOscillator, true, None).unwrap();
        let occ0 = vib.mode_occupation(0);
        let occ1 = vib.mode_occupation(1);
        for i in 0..vib.dim() {
            assert!(occ0[i] + occ1[i] < 3.0 - 0.5);
        }
        assert_eq!(occ0[0] + occ1[0], 0.0);
    }
}
