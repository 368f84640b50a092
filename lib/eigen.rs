//! Eigendecomposition of Liouvillian blocks with the crate's sign, ordering,
//! and normalization conventions.
//!
//! Eigenvalues are rounded to 12 decimal digits before sorting so that the
//! zero (steady-state) eigenvalue is detected exactly; right eigenvectors
//! have their largest-magnitude component made non-negative real for
//! reproducibility; the steady-state eigenvector is normalized to unit trace
//! when reinterpreted as a density matrix.

use ndarray::{ self as nd };
use ndarray_linalg::{ Eig, SVD };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{ error::VibronicResult, tensor::dagger };

/// Absolute and relative tolerance of the biorthogonality diagnostic.
pub const BIORTH_TOL: f64 = 1e-10;

/// Decimal digits kept when rounding eigenvalues and pruned magnitudes.
pub const ROUND_DIGITS: i32 = 12;

/// One diagonalized block: `left · L · right == diag(eigenvalues)` to
/// [`BIORTH_TOL`], left vectors as rows, right vectors as columns.
#[derive(Clone, Debug)]
pub struct Eigensystem {
    pub eigenvalues: nd::Array1<C64>,
    pub right: nd::Array2<C64>,
    pub left: nd::Array2<C64>,
}

/// Options for [`eigensystem_with`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EigenOptions {
    /// Obtain left eigenvectors by pseudo-inverting the right eigenvector
    /// matrix; otherwise decompose `Lᵀ` independently and binormalize.
    pub invert: bool,
    /// Run the biorthogonality diagnostic.
    pub check: bool,
    /// The block is a reduced population subspace with no off-diagonal
    /// structure: normalize the steady state by its component sum instead of
    /// a reshaped trace.
    pub populations_only: bool,
}

impl Default for EigenOptions {
    fn default() -> Self {
        Self { invert: true, check: true, populations_only: false }
    }
}

pub(crate) fn round_digits(x: f64, digits: i32) -> f64 {
    let f = 10.0_f64.powi(digits);
    (x * f).round() / f
}

pub(crate) fn round_c(z: C64, digits: i32) -> C64 {
    C64::new(round_digits(z.re, digits), round_digits(z.im, digits))
}

/// Largest elementwise absolute deviation between two matrices.
pub(crate) fn max_abs_dev(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> f64 {
    a.iter().zip(b.iter())
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, f64::max)
}

/// Elementwise `|a - b| <= atol + rtol * |b|`.
pub(crate) fn allclose(
    a: &nd::Array2<C64>,
    b: &nd::Array2<C64>,
    rtol: f64,
    atol: f64,
) -> bool
{
    a.iter().zip(b.iter())
        .all(|(x, y)| (x - y).norm() <= atol + rtol * y.norm())
}

/// Moore-Penrose pseudo-inverse via SVD.
pub(crate) fn pinv(m: &nd::Array2<C64>) -> VibronicResult<nd::Array2<C64>> {
    let (u, s, vt) = m.svd(true, true)?;
    let u = u.expect("pinv: svd did not return u");
    let vt = vt.expect("pinv: svd did not return v^T");
    let smax = s.iter().copied().fold(0.0, f64::max);
    let cutoff = smax * (m.nrows().max(m.ncols()) as f64) * f64::EPSILON;
    let mut sinv = nd::Array2::<C64>::zeros((vt.nrows(), u.nrows()));
    for (k, &sk) in s.iter().enumerate() {
        if sk > cutoff {
            sinv[[k, k]] = C64::from(1.0 / sk);
        }
    }
    Ok(dagger(&vt).dot(&sinv).dot(&dagger(&u)))
}

/// Right-eigendecompose a block with default options (pseudo-inverse left
/// vectors, biorthogonality diagnostic on).
pub fn eigensystem(l: &nd::Array2<C64>) -> VibronicResult<Eigensystem> {
    eigensystem_with(l, EigenOptions::default())
}

/// Right-eigendecompose a block.
///
/// A biorthogonality miss is a diagnostic, not an error: the largest
/// deviation is reported through `log::warn!` and the decomposition is still
/// returned.
pub fn eigensystem_with(l: &nd::Array2<C64>, opts: EigenOptions)
    -> VibronicResult<Eigensystem>
{
    let (vals, vecs) = l.eig()?;
    let vals = vals.mapv(|z| round_c(z, ROUND_DIGITS));
    let (vals, mut vecs) = sort_columns(&vals, &vecs);
    let size = vals.len();

    for i in 0..size {
        apply_sign_convention(&mut vecs, i);
        if vals[i] == C64::zero() {
            normalize_steady_state(&mut vecs, i, opts.populations_only);
        }
    }

    let left = if opts.invert {
        pinv(&vecs)?
    } else {
        let (lvals, lvecs) = l.t().to_owned().eig()?;
        let lvals = lvals.mapv(|z| round_c(z, ROUND_DIGITS));
        let (_, lvecs) = sort_columns(&lvals, &lvecs);
        let mut left = lvecs.t().to_owned();
        for i in 0..size {
            let norm: C64
                = left.row(i).iter()
                .zip(vecs.column(i).iter())
                .map(|(a, b)| a * b)
                .sum();
            let mut row = left.row_mut(i);
            row.mapv_inplace(|z| z / norm);
        }
        left
    };

    if opts.check {
        check_biorthogonality(l, &vals, &vecs, &left);
    }

    Ok(Eigensystem { eigenvalues: vals, right: vecs, left })
}

/// Decompose a block whose coherences are already diagonal: every
/// off-population eigenvalue is read straight off the diagonal with trivial
/// eigenvectors, and only the population subspace (vectorized indices
/// `i * (pop_size + 1)`) is eigendecomposed and re-embedded.
///
/// `pop_size` is the Hilbert-space dimension of the block's manifold when
/// ket and bra manifolds coincide; pass `None` for pure coherence blocks,
/// which are taken as fully diagonal.
pub fn eigensystem_populations(
    l: &nd::Array2<C64>,
    pop_size: Option<usize>,
    check: bool,
) -> VibronicResult<Eigensystem>
{
    let size = l.nrows();
    let mut vals: nd::Array1<C64> = l.diag().to_owned();
    let mut right = nd::Array2::<C64>::eye(size);
    let mut left = nd::Array2::<C64>::eye(size);

    if let Some(pop) = pop_size {
        let pop_inds: Vec<usize> = (0..pop).map(|i| i * (pop + 1)).collect();
        let l_pop = crate::tensor::gather(l, &pop_inds, &pop_inds);
        let sub = eigensystem_with(
            &l_pop,
            EigenOptions { populations_only: true, ..EigenOptions::default() },
        )?;
        for (j, &vj) in pop_inds.iter().enumerate() {
            vals[vj] = sub.eigenvalues[j];
            for (k, &vk) in pop_inds.iter().enumerate() {
                right[[vk, vj]] = sub.right[[k, j]];
                left[[vk, vj]] = sub.left[[k, j]];
            }
        }
    }

    if check {
        check_biorthogonality(l, &vals, &right, &left);
    }

    Ok(Eigensystem { eigenvalues: vals, right, left })
}

fn sort_columns(vals: &nd::Array1<C64>, vecs: &nd::Array2<C64>)
    -> (nd::Array1<C64>, nd::Array2<C64>)
{
    let size = vals.len();
    let mut order: Vec<usize> = (0..size).collect();
    order.sort_by(|&a, &b| {
        vals[a].re.partial_cmp(&vals[b].re)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                vals[a].im.partial_cmp(&vals[b].im)
                    .unwrap_or(std::cmp::Ordering::Equal)
            )
    });
    let sorted_vals: nd::Array1<C64>
        = order.iter().map(|&k| vals[k]).collect();
    let mut sorted_vecs = nd::Array2::<C64>::zeros(vecs.raw_dim());
    for (new, &old) in order.iter().enumerate() {
        sorted_vecs.column_mut(new).assign(&vecs.column(old));
    }
    (sorted_vals, sorted_vecs)
}

/// Negate a column if the real part of its largest-magnitude component is
/// negative.
fn apply_sign_convention(vecs: &mut nd::Array2<C64>, i: usize) {
    let col = vecs.column(i);
    let max_index = col.iter().enumerate()
        .max_by(|(_, a), (_, b)| {
            a.norm().partial_cmp(&b.norm())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(k, _)| k)
        .unwrap_or(0);
    if col[max_index].re < 0.0 {
        vecs.column_mut(i).mapv_inplace(|z| -z);
    }
}

/// Normalize a zero-eigenvalue column to unit trace.
///
/// Interpreted as a vectorized density matrix, the column's trace is the sum
/// of its entries at stride `dim + 1`; a reduced population vector has no
/// off-diagonal structure and is normalized by its plain component sum.
fn normalize_steady_state(
    vecs: &mut nd::Array2<C64>,
    i: usize,
    populations_only: bool,
) {
    let trace: C64 = if populations_only {
        vecs.column(i).iter().sum()
    } else {
        let dim = (vecs.nrows() as f64).sqrt().round() as usize;
        (0..dim).map(|k| vecs[[k * (dim + 1), i]]).sum()
    };
    vecs.column_mut(i).mapv_inplace(|z| z / trace);
}

fn check_biorthogonality(
    l: &nd::Array2<C64>,
    vals: &nd::Array1<C64>,
    right: &nd::Array2<C64>,
    left: &nd::Array2<C64>,
) {
    let d = left.dot(&l.dot(right));
    let expected = nd::Array2::from_diag(vals);
    if !allclose(&d, &expected, BIORTH_TOL, BIORTH_TOL) {
        log::warn!(
            "eigenvectors do not diagonalize the block to tolerance; \
            largest deviation is {:.3e}",
            max_abs_dev(&d, &expected),
        );
    }
}
