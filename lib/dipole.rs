//! Transition-dipole superoperators between adjacent manifolds, expressed in
//! the block eigenbases and pruned of negligible entries.

use std::fmt;
use indexmap::IndexMap;
use ndarray::{ self as nd, s, linalg::kron };
use num_complex::Complex64 as C64;
use crate::{
    eigen::{ round_digits, ROUND_DIGITS },
    liouvillian::ManifoldKey,
};

/// Names one dipole-induced transition between Liouvillian blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DipoleKey {
    pub from: ManifoldKey,
    pub to: ManifoldKey,
}

impl fmt::Display for DipoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_to_{}", self.from, self.to)
    }
}

/// One dipole superoperator block: the raw transformed tensor, the pruned
/// copy, and the boolean occupancy mask that produced it. The last axis
/// indexes the x, y, z polarizations.
#[derive(Clone, Debug)]
pub struct DipoleBlock {
    pub tensor: nd::Array3<C64>,
    pub pruned: nd::Array3<C64>,
    pub mask: nd::Array2<bool>,
}

/// All dipole blocks of a run, in insertion order.
pub type DipoleSet = IndexMap<DipoleKey, DipoleBlock>;

/// Ket-side dipole superoperator: the Hilbert-space block acts on the ket
/// index while the bra index is untouched.
pub fn ket_superoperator(mu: &nd::Array2<C64>, bra_dim: usize)
    -> nd::Array2<C64>
{
    kron(mu, &nd::Array2::eye(bra_dim))
}

/// Bra-side dipole superoperator; the transpose enters through the
/// vectorization convention.
pub fn bra_superoperator(mu: &nd::Array2<C64>, ket_dim: usize)
    -> nd::Array2<C64>
{
    kron(&nd::Array2::eye(ket_dim), &mu.t().to_owned())
}

/// Stack the three polarization components into one 3-vector-valued matrix.
///
/// *Panics* if the components have unequal shapes.
pub fn stack_polarizations(mus: [nd::Array2<C64>; 3]) -> nd::Array3<C64> {
    let shape = mus[0].raw_dim();
    if mus.iter().any(|m| m.raw_dim() != shape) {
        panic!("stack_polarizations: unequal component shapes");
    }
    let mut out = nd::Array3::zeros((shape[0], shape[1], 3));
    for (axis, m) in mus.iter().enumerate() {
        out.slice_mut(s![.., .., axis]).assign(m);
    }
    out
}

/// Zero out entries whose polarization-summed magnitude squared rounds to
/// exactly zero at 12 digits, and record the surviving entries in a boolean
/// mask.
pub fn prune(tensor: &nd::Array3<C64>) -> (nd::Array3<C64>, nd::Array2<bool>) {
    let (rows, cols, _) = tensor.dim();
    let mut mask = nd::Array2::from_elem((rows, cols), false);
    let mut pruned = tensor.clone();
    for i in 0..rows {
        for j in 0..cols {
            let weight: f64 = (0..3)
                .map(|p| tensor[[i, j, p]].norm_sqr())
                .sum();
            if round_digits(weight, ROUND_DIGITS) != 0.0 {
                mask[[i, j]] = true;
            } else {
                for p in 0..3 {
                    pruned[[i, j, p]] = C64::from(0.0);
                }
            }
        }
    }
    (pruned, mask)
}

/// Assemble a [`DipoleBlock`] from its three transformed polarization
/// components.
pub fn block_from_components(mus: [nd::Array2<C64>; 3]) -> DipoleBlock {
    let tensor = stack_polarizations(mus);
    let (pruned, mask) = prune(&tensor);
    DipoleBlock { tensor, pruned, mask }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dipole_keys_render_with_separators() {
        let key = DipoleKey {
            from: ManifoldKey::new(0, 1),
            to: ManifoldKey::new(1, 1),
        };
        assert_eq!(key.to_string(), "0_1_to_1_1");
    }

    #[test]
    fn prune_zeros_negligible_entries_and_records_them() {
        let mut x = nd::Array2::<C64>::zeros((2, 2));
        x[[0, 1]] = C64::from(0.7);
        x[[1, 0]] = C64::from(1e-13);
        let blk = block_from_components([
            x,
            nd::Array2::zeros((2, 2)),
            nd::Array2::zeros((2, 2)),
        ]);
        assert!(blk.mask[[0, 1]]);
        assert!(!blk.mask[[1, 0]]);
        assert_eq!(blk.pruned[[1, 0, 0]], C64::from(0.0));
        // the raw tensor keeps the tiny entry
        assert_eq!(blk.tensor[[1, 0, 0]], C64::from(1e-13));
        assert_eq!(blk.pruned[[0, 1, 0]], C64::from(0.7));
    }

    #[test]
    fn superoperator_shapes_follow_the_block_dims() {
        let mu = nd::Array2::<C64>::zeros((3, 2));
        assert_eq!(ket_superoperator(&mu, 4).dim(), (12, 8));
        // the bra block is transposed by the vectorization convention
        assert_eq!(bra_superoperator(&mu, 4).dim(), (8, 12));
    }
}
