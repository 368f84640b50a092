//! Seam for the single-mode anharmonic-oscillator primitive.
//!
//! The vibrational model consumes one mode at a time through the
//! [`Oscillator`] trait: a dimensionless Hamiltonian on a truncated ladder,
//! parameterized by reorganization energy, displacement, and kinetic and
//! potential shape coefficients, plus the bare raising operator. The crate
//! treats the primitive as opaque; [`DisplacedOscillator`] is the default
//! implementation, built from ladder-operator algebra, so the crate runs
//! stand-alone and swapping in an external solver is a one-trait exercise.

use ndarray::{ self as nd };
use num_complex::Complex64 as C64;

/// Shape of a single vibrational surface for one electronic occupation.
#[derive(Clone, Debug, PartialEq)]
pub struct OscillatorParams {
    /// Reorganization energy in units of the mode frequency.
    pub reorganization: f64,
    /// Dimensionless displacement of the potential minimum.
    pub displacement: f64,
    /// Coefficients of successive even powers of the momentum quadrature,
    /// starting at `p^2`.
    pub kinetic: Vec<f64>,
    /// Coefficients of successive even powers of the displaced position
    /// quadrature, starting at `(q - d)^2`.
    pub potential: Vec<f64>,
}

impl OscillatorParams {
    /// A plain undisplaced harmonic surface.
    pub fn harmonic() -> Self {
        Self {
            reorganization: 0.0,
            displacement: 0.0,
            kinetic: vec![1.0],
            potential: vec![1.0],
        }
    }
}

/// A single-mode oscillator backend.
///
/// The dimensionless Hamiltonian is scaled by `omega / 2` at the point of
/// use, so a harmonic surface must yield eigenvalues `2n + 1` on an
/// untruncated ladder.
pub trait Oscillator {
    /// Build the dimensionless single-mode Hamiltonian on a `size`-level
    /// ladder.
    fn hamiltonian(&self, size: usize, params: &OscillatorParams)
        -> nd::Array2<C64>;

    /// Build the bare raising operator on a `size`-level ladder.
    fn raising(&self, size: usize) -> nd::Array2<C64>;
}

/// Default primitive: a displaced, optionally anharmonic oscillator in the
/// truncated number basis.
///
/// `H = Σ_k kin_k P^(2k+2) + Σ_k pot_k (Q - d)^(2k+2) + 2 λ`, with
/// `Q = (a + a†)/√2` and `P = i (a† - a)/√2`. Truncation artifacts in the
/// top few ladder states are expected and are controlled by the caller's
/// occupation-number masking.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplacedOscillator;

impl DisplacedOscillator {
    fn position(size: usize) -> nd::Array2<C64> {
        let a = ladder(size);
        let ad = a.t().to_owned();
        (a + ad).mapv(|z| z / 2.0_f64.sqrt())
    }

    fn momentum(size: usize) -> nd::Array2<C64> {
        let a = ladder(size);
        let ad = a.t().to_owned();
        (ad - a).mapv(|z| C64::i() * z / 2.0_f64.sqrt())
    }
}

impl Oscillator for DisplacedOscillator {
    fn hamiltonian(&self, size: usize, params: &OscillatorParams)
        -> nd::Array2<C64>
    {
        let p = Self::momentum(size);
        let q = Self::position(size)
            - nd::Array2::<C64>::eye(size) * C64::from(params.displacement);
        let p2 = p.dot(&p);
        let q2 = q.dot(&q);
        let mut h
            = nd::Array2::<C64>::eye(size)
            * C64::from(2.0 * params.reorganization);
        let mut p_pow = p2.clone();
        for &c in params.kinetic.iter() {
            h = h + p_pow.mapv(|z| z * c);
            p_pow = p_pow.dot(&p2);
        }
        let mut q_pow = q2.clone();
        for &c in params.potential.iter() {
            h = h + q_pow.mapv(|z| z * c);
            q_pow = q_pow.dot(&q2);
        }
        h
    }

    fn raising(&self, size: usize) -> nd::Array2<C64> {
        ladder(size).t().to_owned()
    }
}

/// Lowering operator `a` with `a[n, n+1] = √(n+1)`.
fn ladder(size: usize) -> nd::Array2<C64> {
    let mut a = nd::Array2::<C64>::zeros((size, size));
    for n in 0..size.saturating_sub(1) {
        a[[n, n + 1]] = C64::from(((n + 1) as f64).sqrt());
    }
    a
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn harmonic_ladder_is_linear() {
        // the diagonal of P² + Q² is 2n + 1 below the truncation edge
        let osc = DisplacedOscillator;
        let h = osc.hamiltonian(6, &OscillatorParams::harmonic());
        for n in 0..5 {
            assert!((h[[n, n]].re - (2.0 * n as f64 + 1.0)).abs() < 1e-12);
            assert!(h[[n, n]].im.abs() < 1e-12);
        }
    }

    #[test]
    fn raising_operator_has_sqrt_weights() {
        let osc = DisplacedOscillator;
        let up = osc.raising(4);
        for n in 0..3 {
            assert!((up[[n + 1, n]].re - ((n + 1) as f64).sqrt()).abs() < 1e-12);
        }
        assert_eq!(up[[0, 1]], C64::from(0.0));
    }
}
