//! Lindblad instruction builders, detailed-balance weighting, and the named
//! dissipator families of the electronic subsystem.
//!
//! An instruction is an ordered pair `(Left, Right)` of equal-dimension
//! matrices contributing `kron(Left, Rightᵀ)` to the vectorized generator,
//! i.e. the action `rho -> Left · rho · Right`. A physical dissipator with
//! jump operator `O` and rate `γ` is exactly three instructions: the decay
//! term and the two anticommutator halves.

use itertools::Itertools;
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use serde::Deserialize;
use crate::{ electronic::Polymer, tensor::dagger };

/// One vectorized generator term; see the module docs for semantics.
pub type LindbladInstruction = (nd::Array2<C64>, nd::Array2<C64>);

pub const DEFAULT_OPTICAL_DEPHASING: f64 = 0.1;
pub const DEFAULT_OPTICAL_DECOHERENCE: f64 = 0.0;
pub const DEFAULT_SITE_DEPHASING: f64 = 0.0;
pub const DEFAULT_SITE_DECOHERENCE: f64 = 0.0;
pub const DEFAULT_EXCITON_DEPHASING: f64 = 0.01;
pub const DEFAULT_EXCITON_DECOHERENCE: f64 = 0.0;
pub const DEFAULT_VIBRATIONAL_RELAXATION: f64 = 0.1;
pub const DEFAULT_KT: f64 = 1.0;

/// Named dissipation channel rates and the thermal energy scale.
///
/// A rate of exactly zero disables its channel entirely; the corresponding
/// builder is skipped rather than emitting a null dissipator.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DissipationRates {
    pub optical_dephasing: f64,
    pub optical_decoherence: f64,
    pub site_to_site_dephasing: f64,
    pub site_to_site_decoherence: f64,
    pub exciton_exciton_dephasing: f64,
    pub exciton_decoherence: f64,
    pub vibrational_relaxation: f64,
    pub kt: f64,
}

impl Default for DissipationRates {
    fn default() -> Self {
        Self {
            optical_dephasing: DEFAULT_OPTICAL_DEPHASING,
            optical_decoherence: DEFAULT_OPTICAL_DECOHERENCE,
            site_to_site_dephasing: DEFAULT_SITE_DEPHASING,
            site_to_site_decoherence: DEFAULT_SITE_DECOHERENCE,
            exciton_exciton_dephasing: DEFAULT_EXCITON_DEPHASING,
            exciton_decoherence: DEFAULT_EXCITON_DECOHERENCE,
            vibrational_relaxation: DEFAULT_VIBRATIONAL_RELAXATION,
            kt: DEFAULT_KT,
        }
    }
}

/// The canonical three instructions for jump operator `o` at rate `gamma`:
/// `(γO, O†)`, `(-γO†O/2, I)`, `(I, -γO†O/2)`.
pub fn lindblad(gamma: f64, o: &nd::Array2<C64>) -> Vec<LindbladInstruction> {
    let eye = nd::Array2::eye(o.nrows());
    let od = dagger(o);
    let halves = od.dot(o).mapv(|z| z * (-gamma / 2.0));
    vec![
        (o.mapv(|z| z * gamma), od),
        (halves.clone(), eye.clone()),
        (eye, halves),
    ]
}

/// Two-Hilbert-space variant of [`lindblad`] for distinct ket and bra
/// operators on an optical coherence block.
pub fn lindblad2(
    gamma: f64,
    oket: &nd::Array2<C64>,
    obra: &nd::Array2<C64>,
) -> Vec<LindbladInstruction>
{
    let eye_ket = nd::Array2::eye(oket.nrows());
    let eye_bra = nd::Array2::eye(obra.nrows());
    let oket_d = dagger(oket);
    let obra_d = dagger(obra);
    let left = oket_d.dot(oket).mapv(|z| z * (-gamma / 4.0));
    let right = obra_d.dot(obra).mapv(|z| z * (-gamma / 4.0));
    vec![
        (oket.mapv(|z| z * (gamma / 2.0)), obra_d),
        (left, eye_bra),
        (eye_ket, right),
    ]
}

/// Commutator instructions `[(O, I), (I, -O)]` for Hamiltonian-type terms.
pub fn commutator_instructions(o: &nd::Array2<C64>)
    -> Vec<LindbladInstruction>
{
    let eye = nd::Array2::eye(o.nrows());
    vec![(o.clone(), eye.clone()), (eye, o.mapv(|z| -z))]
}

/// Two-Hilbert-space commutator instructions for distinct ket and bra
/// blocks.
pub fn commutator_instructions2(
    oket: &nd::Array2<C64>,
    obra: &nd::Array2<C64>,
) -> Vec<LindbladInstruction>
{
    let eye_ket = nd::Array2::eye(oket.nrows());
    let eye_bra = nd::Array2::eye(obra.nrows());
    vec![(oket.clone(), eye_bra), (eye_ket, obra.mapv(|z| -z))]
}

/// Detailed-balance weights for a two-level exchange at thermal energy `kt`.
///
/// Returns `(w1, w2)` where `w1` weights the transition terminating in the
/// state of energy `e1` and `w2` the reverse. Equal energies give
/// `(0.5, 0.5)`; at `kt == 0` all weight goes to the downward transition;
/// a vanishing partition function falls back to the zero-temperature limit.
pub fn boltzmann(kt: f64, e1: f64, e2: f64) -> (f64, f64) {
    if e1 == e2 {
        (0.5, 0.5)
    } else if e1 < e2 {
        boltzmann_ordered(kt, e1, e2)
    } else {
        let (hi_to_lo, lo_to_hi) = boltzmann_ordered(kt, e2, e1);
        (lo_to_hi, hi_to_lo)
    }
}

/// `e_low` must be less than `e_high`; returns (downward, upward) weights.
fn boltzmann_ordered(kt: f64, e_low: f64, e_high: f64) -> (f64, f64) {
    if kt == 0.0 {
        return (1.0, 0.0);
    }
    let z = (-e_low / kt).exp() + (-e_high / kt).exp();
    if z.abs() <= 1e-8 {
        (1.0, 0.0)
    } else {
        ((-e_low / kt).exp() / z, (-e_high / kt).exp() / z)
    }
}

/// Uniform pure-dephasing dissipator on the single global operator
/// `Σ_i sz_i`.
pub fn optical_dephasing_instructions(polymer: &Polymer, gamma: f64)
    -> Vec<LindbladInstruction>
{
    let mut total = polymer.sz_list()[0].clone();
    for sz in polymer.sz_list().iter().skip(1) {
        total = total + sz;
    }
    lindblad(gamma, &total)
}

/// Ground/excited population decay per site, weighted by
/// `boltzmann(0, E_i)`; the upward instruction is dropped when its weight is
/// negligible.
pub fn optical_decoherence_instructions(
    polymer: &Polymer,
    gamma: f64,
    kt: f64,
) -> Vec<LindbladInstruction>
{
    let mut out = Vec::new();
    for (energy, up) in
        polymer.energies().iter().zip(polymer.up_list().iter())
    {
        let (to_ground, to_excited) = boltzmann(kt, 0.0, *energy);
        out.extend(lindblad(gamma * to_ground, &up.t().to_owned()));
        if to_excited.abs() > 1e-8 {
            out.extend(lindblad(gamma * to_excited, up));
        }
    }
    out
}

/// Population exchange between each unordered site pair, through the
/// corresponding exchange operator, weighted by detailed balance on the two
/// site energies.
pub fn site_decoherence_instructions(
    polymer: &Polymer,
    gamma: f64,
    kt: f64,
) -> Vec<LindbladInstruction>
{
    let energies = polymer.energies();
    let mut out = Vec::new();
    for (k, pair) in
        (0..energies.len()).combinations(2).enumerate()
    {
        let (en, em) = (energies[pair[0]], energies[pair[1]]);
        let (bn, bm) = boltzmann(kt, en, em);
        let exch = &polymer.exchange_list()[k];
        out.extend(lindblad(gamma * bn, exch));
        out.extend(lindblad(gamma * bm, &exch.t().to_owned()));
    }
    out
}

/// Relative dephasing `sz_i - sz_j` for each unordered site pair.
pub fn site_dephasing_instructions(polymer: &Polymer, gamma: f64)
    -> Vec<LindbladInstruction>
{
    let sz = polymer.sz_list();
    let mut out = Vec::new();
    for pair in (0..sz.len()).combinations(2) {
        let o = &sz[pair[0]] - &sz[pair[1]];
        out.extend(lindblad(gamma, &o));
    }
    out
}

/// Relative dephasing between excitons: the site operators are first rotated
/// into the electronic eigenbasis, and the rate is normalized by `1/(2n)` so
/// the aggregate dephasing is independent of site count.
pub fn exciton_dephasing_instructions(polymer: &Polymer, gamma: f64)
    -> Vec<LindbladInstruction>
{
    let n = polymer.num_sites();
    let scaled = gamma / (2.0 * n as f64);
    let mut out = Vec::new();
    for pair in (0..n).combinations(2) {
        let oi = polymer.to_eigenbasis(&polymer.sz_list()[pair[0]]);
        let oj = polymer.to_eigenbasis(&polymer.sz_list()[pair[1]]);
        let o = oi - oj;
        out.extend(lindblad(scaled, &o));
    }
    out
}

/// Thermal population exchange between the eigenstates of one excitation
/// manifold, embedded in the full electronic space.
pub fn exciton_decoherence_instructions_by_manifold(
    polymer: &Polymer,
    gamma: f64,
    kt: f64,
    manifold: usize,
    full_space: bool,
) -> Vec<LindbladInstruction>
{
    let e = polymer.manifold_eigenvalues(manifold);
    let v = polymer.manifold_eigenvectors(manifold);
    let size = e.len();
    let mut out = Vec::new();
    for pair in (0..size).combinations(2) {
        let (m, n) = (pair[0], pair[1]);
        let (bm, bn) = boltzmann(kt, e[m], e[n]);
        let mut exchange = nd::Array2::<C64>::zeros((size, size));
        exchange[[m, n]] = 1.0.into();
        let mut o = v.dot(&exchange).dot(&dagger(v));
        if full_space {
            o = polymer.manifold_to_full(&o, manifold);
        }
        out.extend(lindblad(gamma * bm, &o));
        out.extend(lindblad(gamma * bn, &o.t().to_owned()));
    }
    out
}

/// All active electronic dissipation channels, concatenated.
///
/// Channels with a rate of exactly zero are skipped. Enabling both the site
/// and exciton variants of the same physical mechanism is ambiguous
/// double-counting and is reported as a warning.
pub fn electronic_dissipation_instructions(
    polymer: &Polymer,
    rates: &DissipationRates,
) -> Vec<LindbladInstruction>
{
    if rates.exciton_exciton_dephasing != 0.0
        && rates.site_to_site_dephasing != 0.0
    {
        log::warn!("both exciton and site dephasing are being included");
    }
    if rates.exciton_decoherence != 0.0
        && rates.site_to_site_decoherence != 0.0
    {
        log::warn!("both exciton and site relaxation are being included");
    }

    let mut out = Vec::new();
    if rates.optical_dephasing != 0.0 {
        out.extend(optical_dephasing_instructions(
            polymer, rates.optical_dephasing));
    }
    if rates.site_to_site_dephasing != 0.0 {
        out.extend(site_dephasing_instructions(
            polymer, rates.site_to_site_dephasing));
    }
    if rates.site_to_site_decoherence != 0.0 {
        out.extend(site_decoherence_instructions(
            polymer, rates.site_to_site_decoherence, rates.kt));
    }
    if rates.exciton_exciton_dephasing != 0.0 {
        out.extend(exciton_dephasing_instructions(
            polymer, rates.exciton_exciton_dephasing));
    }
    if rates.exciton_decoherence != 0.0 {
        for m in 1..=polymer.num_sites() {
            out.extend(exciton_decoherence_instructions_by_manifold(
                polymer, rates.exciton_decoherence, rates.kt, m, true));
        }
    }
    if rates.optical_decoherence != 0.0 {
        out.extend(optical_decoherence_instructions(
            polymer, rates.optical_decoherence, rates.kt));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn apply(instructions: &[LindbladInstruction], rho: &nd::Array2<C64>)
        -> nd::Array2<C64>
    {
        let dim = rho.nrows();
        let mut out = nd::Array2::<C64>::zeros((dim, dim));
        for (left, right) in instructions {
            out = out + left.dot(rho).dot(right);
        }
        out
    }

    #[test]
    fn lindblad_preserves_trace() {
        let mut o = nd::Array2::<C64>::zeros((2, 2));
        o[[0, 1]] = C64::new(0.3, -0.7);
        o[[1, 0]] = C64::new(1.1, 0.2);
        let ins = lindblad(0.37, &o);
        assert_eq!(ins.len(), 3);
        let mut rho = nd::Array2::<C64>::zeros((2, 2));
        rho[[0, 0]] = 0.25.into();
        rho[[1, 1]] = 0.75.into();
        rho[[0, 1]] = C64::new(0.1, 0.05);
        rho[[1, 0]] = C64::new(0.1, -0.05);
        let drho = apply(&ins, &rho);
        let trace: C64 = drho.diag().iter().sum();
        assert!(trace.norm() < 1e-12);
    }

    #[test]
    fn boltzmann_is_symmetric_and_thermal() {
        assert_eq!(boltzmann(1.0, 2.5, 2.5), (0.5, 0.5));
        let (a, b) = boltzmann(1.0, 0.0, 1.0);
        let (c, d) = boltzmann(1.0, 1.0, 0.0);
        assert_eq!((a, b), (d, c));
        assert!((a + b - 1.0).abs() < 1e-12);
        assert!(a > b);
        // zero temperature: pure downward decay
        assert_eq!(boltzmann(0.0, 0.0, 1.0), (1.0, 0.0));
        // huge gap at finite temperature: partition function underflows
        let (lo, hi) = boltzmann(1e-3, 0.0, 1e5);
        assert_eq!((lo, hi), (1.0, 0.0));
    }

    #[test]
    fn zero_rates_build_no_instructions() {
        let p = Polymer::new(
            vec![1.0], vec![], vec![[1.0, 0.0, 0.0]]).unwrap();
        let rates = DissipationRates {
            optical_dephasing: 0.0,
            exciton_exciton_dephasing: 0.0,
            ..DissipationRates::default()
        };
        let ins = electronic_dissipation_instructions(&p, &rates);
        assert!(ins.is_empty());
    }

    #[test]
    fn two_space_dissipator_halves_the_rate_on_equal_blocks() {
        let mut o = nd::Array2::<C64>::zeros((2, 2));
        o[[0, 1]] = C64::new(0.4, 0.1);
        let a = lindblad2(0.6, &o, &o);
        let b = lindblad(0.3, &o);
        for ((la, ra), (lb, rb)) in a.iter().zip(b.iter()) {
            assert_eq!(la, lb);
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn two_space_commutator_matches_the_single_space_form() {
        let mut h = nd::Array2::<C64>::zeros((2, 2));
        h[[0, 0]] = 0.3.into();
        h[[1, 1]] = 1.7.into();
        let a = commutator_instructions2(&h, &h);
        let b = commutator_instructions(&h);
        assert_eq!(a, b);
    }

    #[test]
    fn commutator_instructions_reproduce_the_commutator() {
        let mut h = nd::Array2::<C64>::zeros((2, 2));
        h[[0, 1]] = 0.5.into();
        h[[1, 0]] = 0.5.into();
        let mut rho = nd::Array2::<C64>::zeros((2, 2));
        rho[[0, 0]] = 1.0.into();
        let ins = commutator_instructions(&h);
        let direct = h.dot(&rho) - rho.dot(&h);
        assert_eq!(apply(&ins, &rho), direct);
    }
}
