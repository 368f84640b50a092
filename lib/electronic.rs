//! Electronic subsystem: site operators, Hamiltonian, excitation manifolds,
//! and the manifold-wise eigenbasis.
//!
//! Each site is a two-level system; the composite electronic Hilbert space is
//! the `2^n`-dimensional tensor product over sites. Every operator here is
//! built exactly once at construction and read-only thereafter.

use ndarray::{ self as nd };
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    eigen::max_abs_dev,
    error::{ VibronicError, VibronicResult },
    tensor::{ self, gather },
};

/// Tolerance for the manifold-wise re-diagonalization consistency check.
pub const DIAG_TOL: f64 = 1e-8;

fn local_raise() -> nd::Array2<C64> {
    let mut up = nd::Array2::zeros((2, 2));
    up[[1, 0]] = 1.0.into();
    up
}

fn local_lower() -> nd::Array2<C64> {
    let mut dn = nd::Array2::zeros((2, 2));
    dn[[0, 1]] = 1.0.into();
    dn
}

fn local_occupied() -> nd::Array2<C64> {
    let mut occ = nd::Array2::zeros((2, 2));
    occ[[1, 1]] = 1.0.into();
    occ
}

fn local_empty() -> nd::Array2<C64> {
    let mut emp = nd::Array2::zeros((2, 2));
    emp[[0, 0]] = 1.0.into();
    emp
}

/// An aggregate of coupled two-level sites.
///
/// Holds the per-site full-space operator lists, the electronic Hamiltonian,
/// the total-occupation labeling of the basis, the per-manifold eigensystems,
/// and the block-embedded global eigenbasis. Construction fails if the
/// embedded eigenbasis does not re-diagonalize the Hamiltonian to
/// [`DIAG_TOL`].
#[derive(Clone, Debug)]
pub struct Polymer {
    energies: Vec<f64>,
    couplings: Vec<C64>,
    dipoles: Vec<[f64; 3]>,
    up_list: Vec<nd::Array2<C64>>,
    down_list: Vec<nd::Array2<C64>>,
    occupied_list: Vec<nd::Array2<C64>>,
    empty_list: Vec<nd::Array2<C64>>,
    sz_list: Vec<nd::Array2<C64>>,
    exchange_list: Vec<nd::Array2<C64>>,
    hamiltonian: nd::Array2<C64>,
    total_occupation: nd::Array1<f64>,
    manifold_eigvals: Vec<nd::Array1<f64>>,
    manifold_eigvecs: Vec<nd::Array2<C64>>,
    eigenvectors: nd::Array2<C64>,
    eigenvalues: nd::Array1<f64>,
    exciton_energies: nd::Array1<f64>,
    mu: [nd::Array2<C64>; 3],
}

impl Polymer {
    /// Build the full electronic model from site energies, the canonical
    /// ordered list of pair couplings (`J_01, J_02, ..., J_0n, J_12, ...`),
    /// and per-site transition-dipole vectors.
    pub fn new(
        energies: Vec<f64>,
        couplings: Vec<C64>,
        dipoles: Vec<[f64; 3]>,
    ) -> VibronicResult<Self>
    {
        let n = energies.len();
        if n == 0 {
            return Err(VibronicError::ConfigInvalid(
                "at least one site is required".into()));
        }
        if couplings.len() != n * (n - 1) / 2 {
            return Err(VibronicError::ConfigInvalid(format!(
                "expected {} site couplings for {} sites, got {}",
                n * (n - 1) / 2, n, couplings.len())));
        }
        if dipoles.len() != n {
            return Err(VibronicError::ConfigInvalid(format!(
                "expected {} dipole vectors, got {}", n, dipoles.len())));
        }

        let up = local_raise();
        let down = local_lower();
        let occupied = local_occupied();
        let empty = local_empty();
        // the dephasing operator here is the excited-state projector
        let sz = local_occupied();

        let up_list = tensor::single_site_ops(n, 2, &up);
        let down_list = tensor::single_site_ops(n, 2, &down);
        let occupied_list = tensor::single_site_ops(n, 2, &occupied);
        let empty_list = tensor::single_site_ops(n, 2, &empty);
        let sz_list = tensor::single_site_ops(n, 2, &sz);
        let exchange_list = tensor::multi_site_ops(n, 2, &[&up, &down])?;

        let dim = 1_usize << n;
        let mut hamiltonian = nd::Array2::<C64>::zeros((dim, dim));
        for (e, occ) in energies.iter().zip(occupied_list.iter()) {
            hamiltonian = hamiltonian + occ.mapv(|z| z * *e);
        }
        for (j, exch) in couplings.iter().zip(exchange_list.iter()) {
            hamiltonian = hamiltonian + exch.mapv(|z| z * *j);
            hamiltonian
                = hamiltonian + exch.t().to_owned().mapv(|z| z * j.conj());
        }

        let total_occupation = tensor::total_occupation(n, 2);

        let mut polymer = Self {
            energies,
            couplings,
            dipoles,
            up_list,
            down_list,
            occupied_list,
            empty_list,
            sz_list,
            exchange_list,
            hamiltonian,
            total_occupation,
            manifold_eigvals: Vec::new(),
            manifold_eigvecs: Vec::new(),
            eigenvectors: nd::Array2::zeros((0, 0)),
            eigenvalues: nd::Array1::zeros(0),
            exciton_energies: nd::Array1::zeros(0),
            mu: [
                nd::Array2::zeros((dim, dim)),
                nd::Array2::zeros((dim, dim)),
                nd::Array2::zeros((dim, dim)),
            ],
        };
        polymer.set_manifold_eigensystems()?;
        polymer.set_eigenbasis()?;
        polymer.set_dipole_operators();
        Ok(polymer)
    }

    /// Number of sites.
    pub fn num_sites(&self) -> usize { self.energies.len() }

    /// Full electronic Hilbert-space dimension, `2^n`.
    pub fn dim(&self) -> usize { 1 << self.energies.len() }

    /// Site excitation energies.
    pub fn energies(&self) -> &[f64] { &self.energies }

    /// The electronic Hamiltonian on the full space.
    pub fn hamiltonian(&self) -> &nd::Array2<C64> { &self.hamiltonian }

    /// Per-site raising operators.
    pub fn up_list(&self) -> &[nd::Array2<C64>] { &self.up_list }

    /// Per-site lowering operators.
    pub fn down_list(&self) -> &[nd::Array2<C64>] { &self.down_list }

    /// Per-site excited-projector operators.
    pub fn occupied_list(&self) -> &[nd::Array2<C64>] { &self.occupied_list }

    /// Per-site ground-projector operators.
    pub fn empty_list(&self) -> &[nd::Array2<C64>] { &self.empty_list }

    /// Per-site dephasing operators.
    pub fn sz_list(&self) -> &[nd::Array2<C64>] { &self.sz_list }

    /// Exchange operators, one per unordered site pair in lexicographic
    /// order; entry `k` raises the first site of pair `k` and lowers the
    /// second.
    pub fn exchange_list(&self) -> &[nd::Array2<C64>] { &self.exchange_list }

    /// Total electronic occupation number of every basis index.
    pub fn total_occupation(&self) -> &nd::Array1<f64> {
        &self.total_occupation
    }

    /// The total-excitation-number operator: diagonal with integer
    /// eigenvalues `0..=n`.
    pub fn occupation_operator(&self) -> nd::Array2<C64> {
        nd::Array2::from_diag(&self.total_occupation.mapv(C64::from))
    }

    /// Basis indices whose total occupation equals `manifold`.
    pub fn manifold_mask(&self, manifold: usize) -> Vec<usize> {
        self.total_occupation.iter().enumerate()
            .filter(|(_, occ)| (**occ - manifold as f64).abs() < 0.5)
            .map(|(k, _)| k)
            .collect()
    }

    /// Basis indices whose total occupation lies in
    /// `min_occ ..= max_occ`.
    pub fn subspace_mask(&self, min_occ: usize, max_occ: usize) -> Vec<usize> {
        self.total_occupation.iter().enumerate()
            .filter(|(_, occ)| {
                **occ > min_occ as f64 - 0.5 && **occ < max_occ as f64 + 0.5
            })
            .map(|(k, _)| k)
            .collect()
    }

    /// Project `o` onto `manifold1` on the ket side and `manifold2` on the
    /// bra side.
    pub fn extract_coherence(
        &self,
        o: &nd::Array2<C64>,
        manifold1: usize,
        manifold2: usize,
    ) -> nd::Array2<C64>
    {
        let rows = self.manifold_mask(manifold1);
        let cols = self.manifold_mask(manifold2);
        gather(o, &rows, &cols)
    }

    /// Project `o` into a single excitation manifold.
    pub fn extract_manifold(&self, o: &nd::Array2<C64>, manifold: usize)
        -> nd::Array2<C64>
    {
        self.extract_coherence(o, manifold, manifold)
    }

    /// Embed a coherence-block operator back into the full space, zero
    /// elsewhere.
    pub fn coherence_to_full(
        &self,
        o: &nd::Array2<C64>,
        manifold1: usize,
        manifold2: usize,
    ) -> nd::Array2<C64>
    {
        let rows = self.manifold_mask(manifold1);
        let cols = self.manifold_mask(manifold2);
        let mut full = nd::Array2::zeros(self.hamiltonian.raw_dim());
        for (i, &r) in rows.iter().enumerate() {
            for (j, &c) in cols.iter().enumerate() {
                full[[r, c]] = o[[i, j]];
            }
        }
        full
    }

    /// Embed a manifold-block operator back into the full space.
    pub fn manifold_to_full(&self, o: &nd::Array2<C64>, manifold: usize)
        -> nd::Array2<C64>
    {
        self.coherence_to_full(o, manifold, manifold)
    }

    /// Restrict `o` to the subspace with total occupation in
    /// `min_occ ..= max_occ`.
    pub fn extract_subspace(
        &self,
        o: &nd::Array2<C64>,
        min_occ: usize,
        max_occ: usize,
    ) -> nd::Array2<C64>
    {
        let inds = self.subspace_mask(min_occ, max_occ);
        gather(o, &inds, &inds)
    }

    /// The electronic Hamiltonian restricted to one manifold.
    pub fn manifold_hamiltonian(&self, manifold: usize) -> nd::Array2<C64> {
        self.extract_manifold(&self.hamiltonian, manifold)
    }

    fn set_manifold_eigensystems(&mut self) -> VibronicResult<()> {
        let n = self.num_sites();
        let mut vals = Vec::with_capacity(n + 1);
        let mut vecs = Vec::with_capacity(n + 1);
        for m in 0..=n {
            let h = self.manifold_hamiltonian(m);
            let (e, v) = h.eigh(UPLO::Lower)?;
            vals.push(e);
            vecs.push(v);
        }
        self.manifold_eigvals = vals;
        self.manifold_eigvecs = vecs;
        Ok(())
    }

    fn set_eigenbasis(&mut self) -> VibronicResult<()> {
        let n = self.num_sites();
        let dim = self.dim();
        let mut eigvecs = nd::Array2::<C64>::zeros((dim, dim));
        let mut diag = nd::Array2::<C64>::zeros((dim, dim));
        for m in 0..=n {
            let v = &self.manifold_eigvecs[m];
            let e = &self.manifold_eigvals[m];
            eigvecs = eigvecs + self.manifold_to_full(v, m);
            let d = nd::Array2::from_diag(&e.mapv(C64::from));
            diag = diag + self.manifold_to_full(&d, m);
        }
        let rediag
            = tensor::dagger(&eigvecs).dot(&self.hamiltonian).dot(&eigvecs);
        let deviation = max_abs_dev(&rediag, &diag);
        if deviation > DIAG_TOL {
            return Err(VibronicError::Diagonalization { deviation });
        }
        self.exciton_energies = self.manifold_eigvals[1].clone();
        self.eigenvalues = diag.diag().mapv(|z| z.re);
        self.eigenvectors = eigvecs;
        Ok(())
    }

    fn set_dipole_operators(&mut self) {
        let dim = self.dim();
        let mut mu: [nd::Array2<C64>; 3] = [
            nd::Array2::zeros((dim, dim)),
            nd::Array2::zeros((dim, dim)),
            nd::Array2::zeros((dim, dim)),
        ];
        for (axis, mu_ax) in mu.iter_mut().enumerate() {
            for ((d, up), down) in
                self.dipoles.iter()
                .zip(self.up_list.iter())
                .zip(self.down_list.iter())
            {
                let d_ax = d[axis];
                *mu_ax = &*mu_ax + (up + down).mapv(|z| z * d_ax);
            }
        }
        self.mu = mu;
    }

    /// Eigenvalues of one manifold block, ascending.
    pub fn manifold_eigenvalues(&self, manifold: usize) -> &nd::Array1<f64> {
        &self.manifold_eigvals[manifold]
    }

    /// Eigenvectors of one manifold block, columns sorted by energy.
    pub fn manifold_eigenvectors(&self, manifold: usize)
        -> &nd::Array2<C64>
    {
        &self.manifold_eigvecs[manifold]
    }

    /// The block-embedded global eigenbasis.
    pub fn eigenvectors(&self) -> &nd::Array2<C64> { &self.eigenvectors }

    /// Eigenvalues in the embedded-basis ordering.
    pub fn eigenvalues(&self) -> &nd::Array1<f64> { &self.eigenvalues }

    /// Eigenvalues of the singly-excited manifold, ascending.
    pub fn exciton_energies(&self) -> &nd::Array1<f64> {
        &self.exciton_energies
    }

    /// The dipole operator along one polarization axis (0 = x, 1 = y,
    /// 2 = z).
    pub fn mu(&self, axis: usize) -> &nd::Array2<C64> { &self.mu[axis] }

    /// Rotate a site-basis operator into the global exciton eigenbasis.
    pub fn to_eigenbasis(&self, o: &nd::Array2<C64>) -> nd::Array2<C64> {
        let v = &self.eigenvectors;
        v.dot(o).dot(&tensor::dagger(v))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dimer() -> Polymer {
        Polymer::new(
            vec![1.0, 1.0],
            vec![C64::from(0.5)],
            vec![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn single_site_hamiltonian_is_diagonal() {
        let p = Polymer::new(
            vec![1.0], vec![], vec![[1.0, 0.0, 0.0]]).unwrap();
        let h = p.hamiltonian();
        assert_eq!(h[[0, 0]], C64::from(0.0));
        assert_eq!(h[[1, 1]], C64::from(1.0));
        assert_eq!(h[[0, 1]], C64::from(0.0));
        assert_eq!(h[[1, 0]], C64::from(0.0));
    }

    #[test]
    fn manifold_masks_partition_the_basis() {
        let p = dimer();
        let m0 = p.manifold_mask(0);
        let m1 = p.manifold_mask(1);
        let m2 = p.manifold_mask(2);
        assert_eq!(m0.len(), 1);
        assert_eq!(m1.len(), 2);
        assert_eq!(m2.len(), 1);
        let mut all: Vec<usize>
            = m0.into_iter().chain(m1).chain(m2).collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn dimer_exciton_energies_are_split_by_coupling() {
        let p = dimer();
        let e = p.exciton_energies();
        assert!((e[0] - 0.5).abs() < 1e-12);
        assert!((e[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn embedded_eigenbasis_rediagonalizes() {
        let p = dimer();
        let v = p.eigenvectors();
        let rediag
            = crate::tensor::dagger(v).dot(p.hamiltonian()).dot(v);
        let diag = nd::Array2::from_diag(
            &p.eigenvalues().mapv(C64::from));
        assert!(max_abs_dev(&rediag, &diag) < 1e-10);
    }

    #[test]
    fn coupling_count_is_validated() {
        let res = Polymer::new(
            vec![1.0, 2.0],
            vec![],
            vec![[0.0; 3], [0.0; 3]],
        );
        assert!(matches!(res, Err(VibronicError::ConfigInvalid(_))));
    }

    #[test]
    fn dipole_operator_couples_adjacent_manifolds() {
        let p = dimer();
        let mu = p.mu(0);
        // ground -> singly-excited entries carry the site dipoles
        assert_eq!(mu[[1, 0]], C64::from(1.0));
        assert_eq!(mu[[2, 0]], C64::from(1.0));
        // no direct ground -> doubly-excited element
        assert_eq!(mu[[3, 0]], C64::from(0.0));
    }
}
