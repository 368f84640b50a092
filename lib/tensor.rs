//! Kronecker-product assembly of local operators into full-space operators.
//!
//! Every multi-factor operator in the crate is produced here: a local block
//! is inserted at its tensor position among identities on all other factors,
//! in left-to-right factor order. Simultaneous placements of several local
//! operators enumerate the unordered position subsets of the required arity
//! in lexicographic order; that ordering is a contract shared with the
//! site-pair coupling list and every pair-indexed dissipator family.

use itertools::Itertools;
use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use crate::error::{ VibronicError, VibronicResult };

/// Left-fold Kronecker product of a sequence of matrices.
///
/// *Panics* if the sequence is empty.
pub fn kron_chain<'a, I>(mats: I) -> nd::Array2<C64>
where I: IntoIterator<Item = &'a nd::Array2<C64>>
{
    let mut iter = mats.into_iter();
    let first = iter.next()
        .unwrap_or_else(|| panic!("kron_chain: empty factor list"));
    iter.fold(first.clone(), |acc, m| kron(&acc, m))
}

/// Kronecker product of two 1D arrays.
pub fn kron_vec(a: &nd::Array1<f64>, b: &nd::Array1<f64>) -> nd::Array1<f64> {
    a.iter()
        .flat_map(|ai| b.iter().map(move |bj| ai * bj))
        .collect()
}

/// Conjugate transpose.
pub fn dagger(o: &nd::Array2<C64>) -> nd::Array2<C64> {
    o.t().mapv(|z| z.conj())
}

/// Insert local operators at the given factor positions, with identities of
/// size `dim` on every other factor.
///
/// Fails with [`VibronicError::Dimension`] if more operators are supplied
/// than there are factors. *Panics* if a position is out of range.
pub fn insert_at(
    n_factors: usize,
    dim: usize,
    items: &[(usize, &nd::Array2<C64>)],
) -> VibronicResult<nd::Array2<C64>>
{
    if items.len() > n_factors {
        return Err(VibronicError::Dimension {
            requested: items.len(),
            available: n_factors,
        });
    }
    let mut factors: Vec<nd::Array2<C64>>
        = (0..n_factors).map(|_| nd::Array2::eye(dim)).collect();
    for (pos, op) in items {
        if *pos >= n_factors {
            panic!("insert_at: factor position out of range");
        }
        factors[*pos] = (*op).clone();
    }
    Ok(kron_chain(factors.iter()))
}

/// One full-space operator per factor position, each with the local operator
/// placed at that position.
pub fn single_site_ops(n_factors: usize, dim: usize, local: &nd::Array2<C64>)
    -> Vec<nd::Array2<C64>>
{
    (0..n_factors)
        .map(|pos| {
            insert_at(n_factors, dim, &[(pos, local)])
                .expect("single_site_ops: single placement cannot overflow")
        })
        .collect()
}

/// Simultaneous placement of several local operators at every unordered
/// subset of factor positions of matching arity, in lexicographic order.
///
/// The `k`-th returned operator corresponds to the `k`-th combination yielded
/// by [`Itertools::combinations`] over `0..n_factors`.
pub fn multi_site_ops(
    n_factors: usize,
    dim: usize,
    locals: &[&nd::Array2<C64>],
) -> VibronicResult<Vec<nd::Array2<C64>>>
{
    if locals.len() > n_factors {
        return Err(VibronicError::Dimension {
            requested: locals.len(),
            available: n_factors,
        });
    }
    (0..n_factors).combinations(locals.len())
        .map(|positions| {
            let items: Vec<(usize, &nd::Array2<C64>)>
                = positions.iter().copied()
                .zip(locals.iter().copied())
                .collect();
            insert_at(n_factors, dim, &items)
        })
        .collect()
}

/// Kron a per-factor weight vector (e.g. local occupation numbers) with
/// ones-vectors on every other factor.
///
/// Used to label each composite basis index with a single factor's quantum
/// number; summing over positions gives total occupation numbers.
pub fn occupation_vector(
    n_factors: usize,
    dim: usize,
    position: usize,
    item: &nd::Array1<f64>,
) -> nd::Array1<f64>
{
    if position >= n_factors {
        panic!("occupation_vector: factor position out of range");
    }
    let ones = nd::Array1::<f64>::ones(dim);
    let mut acc: Option<nd::Array1<f64>> = None;
    for k in 0..n_factors {
        let factor = if k == position { item } else { &ones };
        acc = Some(match acc {
            Some(v) => kron_vec(&v, factor),
            None => factor.clone(),
        });
    }
    acc.expect("occupation_vector: no tensor factors")
}

/// Gather the submatrix of `o` at the given row and column indices.
pub fn gather(o: &nd::Array2<C64>, rows: &[usize], cols: &[usize])
    -> nd::Array2<C64>
{
    let mut out = nd::Array2::zeros((rows.len(), cols.len()));
    for (i, &r) in rows.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            out[[i, j]] = o[[r, c]];
        }
    }
    out
}

/// Total occupation number of every composite basis index, summing the local
/// ladder `0..dim` over all factors.
pub fn total_occupation(n_factors: usize, dim: usize) -> nd::Array1<f64> {
    let ladder: nd::Array1<f64>
        = (0..dim).map(|k| k as f64).collect();
    let mut total = nd::Array1::<f64>::zeros(dim.pow(n_factors as u32));
    for pos in 0..n_factors {
        total += &occupation_vector(n_factors, dim, pos, &ladder);
    }
    total
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray as nd;

    fn raise2() -> nd::Array2<C64> {
        let mut up = nd::Array2::<C64>::zeros((2, 2));
        up[[1, 0]] = 1.0.into();
        up
    }

    #[test]
    fn single_placement_matches_explicit_kron() {
        let up = raise2();
        let eye = nd::Array2::<C64>::eye(2);
        let expected = kron(&eye, &kron(&up, &eye));
        let built = insert_at(3, 2, &[(1, &up)]).unwrap();
        assert_eq!(built, expected);
    }

    #[test]
    fn too_many_operators_is_a_dimension_error() {
        let up = raise2();
        let res = insert_at(1, 2, &[(0, &up), (0, &up)]);
        assert!(matches!(res, Err(VibronicError::Dimension { .. })));
        let res = multi_site_ops(1, 2, &[&up, &up]);
        assert!(matches!(res, Err(VibronicError::Dimension { .. })));
    }

    #[test]
    fn pair_placements_follow_lexicographic_order() {
        let up = raise2();
        let dn = dagger(&raise2());
        let ops = multi_site_ops(3, 2, &[&up, &dn]).unwrap();
        assert_eq!(ops.len(), 3);
        // combinations of (0..3) taken 2 at a time: (0,1), (0,2), (1,2)
        let eye = nd::Array2::<C64>::eye(2);
        assert_eq!(ops[0], kron(&up, &kron(&dn, &eye)));
        assert_eq!(ops[1], kron(&up, &kron(&eye, &dn)));
        assert_eq!(ops[2], kron(&eye, &kron(&up, &dn)));
    }

    #[test]
    fn total_occupation_counts_every_factor() {
        let occ = total_occupation(2, 2);
        assert_eq!(occ, nd::array![0.0, 1.0, 1.0, 2.0]);
    }
}
