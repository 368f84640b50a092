//! Superoperator assembly from instruction lists and manifold-resolved
//! partitioning.
//!
//! The vectorization convention is `vec(A ρ B) = kron(A, Bᵀ) vec(ρ)` with
//! row-major flattening, so restricting an instruction to a manifold pair
//! restricts its Left operand by the ket-side manifold and its Right operand
//! by the bra-side manifold, even though the transpose of the latter appears
//! in the Kronecker product.

use std::fmt;
use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use crate::{
    dissipation::LindbladInstruction,
    tensor::{ dagger, gather },
};

/// Ordered pair of (ket, bra) excitation-manifold numbers keying one
/// Liouvillian block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifoldKey {
    pub ket: usize,
    pub bra: usize,
}

impl ManifoldKey {
    pub fn new(ket: usize, bra: usize) -> Self { Self { ket, bra } }

    /// `true` for population blocks, where ket and bra manifolds coincide.
    pub fn is_diagonal(&self) -> bool { self.ket == self.bra }
}

impl From<(usize, usize)> for ManifoldKey {
    fn from(kl: (usize, usize)) -> Self { Self { ket: kl.0, bra: kl.1 } }
}

impl fmt::Display for ManifoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ket, self.bra)
    }
}

/// Sum an instruction list into the dense superoperator
/// `Σ kron(Left, Rightᵀ)`.
///
/// *Panics* if the list is empty.
pub fn assemble(instructions: &[LindbladInstruction]) -> nd::Array2<C64> {
    let mut iter = instructions.iter();
    let (left, right) = iter.next()
        .unwrap_or_else(|| panic!("assemble: empty instruction list"));
    let mut acc = kron(left, &right.t().to_owned());
    for (left, right) in iter {
        acc = acc + kron(left, &right.t().to_owned());
    }
    acc
}

/// Restrict every instruction to a (ket, bra) manifold pair, with an
/// optional rotation into per-manifold eigenbases.
///
/// `ket_inds`/`bra_inds` are the basis indices of the two manifolds;
/// `v_ket`/`v_bra`, when given, rotate the restricted operands as
/// `V† O V`.
pub fn restrict_instructions(
    instructions: &[LindbladInstruction],
    ket_inds: &[usize],
    bra_inds: &[usize],
    v_ket: Option<&nd::Array2<C64>>,
    v_bra: Option<&nd::Array2<C64>>,
) -> Vec<LindbladInstruction>
{
    instructions.iter()
        .map(|(left, right)| {
            let mut new_left = gather(left, ket_inds, ket_inds);
            if let Some(v) = v_ket {
                new_left = dagger(v).dot(&new_left).dot(v);
            }
            let mut new_right = gather(right, bra_inds, bra_inds);
            if let Some(v) = v_bra {
                new_right = dagger(v).dot(&new_right).dot(v);
            }
            (new_left, new_right)
        })
        .collect()
}

/// Promote electronic-space instructions to the vibronic space by Kronecker
/// multiplication with the (masked) vibrational identity, optionally
/// restricting the electronic operands to a subspace first.
pub fn promote_instructions(
    instructions: &[LindbladInstruction],
    vibrational_identity: &nd::Array2<C64>,
    electronic_subspace: Option<&[usize]>,
) -> Vec<LindbladInstruction>
{
    instructions.iter()
        .map(|(left, right)| {
            let (left, right) = match electronic_subspace {
                Some(inds) => (
                    gather(left, inds, inds),
                    gather(right, inds, inds),
                ),
                None => (left.clone(), right.clone()),
            };
            (
                kron(&left, vibrational_identity),
                kron(&right, vibrational_identity),
            )
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dissipation::{ commutator_instructions, lindblad };

    #[test]
    fn manifold_keys_do_not_collide_past_ten() {
        let a = ManifoldKey::new(1, 11);
        let b = ManifoldKey::new(11, 1);
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "1_11");
    }

    #[test]
    fn assembled_commutator_matches_direct_action() {
        let mut h = nd::Array2::<C64>::zeros((2, 2));
        h[[0, 0]] = 1.0.into();
        h[[0, 1]] = C64::new(0.0, 0.5);
        h[[1, 0]] = C64::new(0.0, -0.5);
        let l = assemble(&commutator_instructions(&h));
        let mut rho = nd::Array2::<C64>::zeros((2, 2));
        rho[[0, 1]] = 1.0.into();
        let vec_rho: nd::Array1<C64>
            = rho.iter().copied().collect();
        let out = l.dot(&vec_rho);
        let direct = h.dot(&rho) - rho.dot(&h);
        let direct_vec: nd::Array1<C64>
            = direct.iter().copied().collect();
        for (a, b) in out.iter().zip(direct_vec.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn dissipator_superoperator_annihilates_the_trace() {
        // columns of ones . L == 0 row-wise for any trace-preserving
        // generator; check on the vectorized identity action instead
        let mut o = nd::Array2::<C64>::zeros((2, 2));
        o[[0, 1]] = 1.0.into();
        let l = assemble(&lindblad(0.2, &o));
        // trace functional in the vectorized picture: sum of entries at
        // positions i * (dim + 1)
        let dim = 2;
        for col in 0..dim * dim {
            let tr: C64 = (0..dim).map(|i| l[[i * (dim + 1), col]]).sum();
            assert!(tr.norm() < 1e-12);
        }
    }
}
