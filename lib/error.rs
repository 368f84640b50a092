//! Error types shared across the crate.

use thiserror::Error;

/// All fatal failure modes of system construction and persistence.
///
/// Numerical-tolerance misses are deliberately *not* represented here; they
/// are diagnostics, reported through [`log::warn!`] while execution continues
/// with best-effort results.
#[derive(Debug, Error)]
pub enum VibronicError {
    /// More simultaneous local operators were requested than there are tensor
    /// factors to place them on.
    #[error("requested {requested} simultaneous operators on {available} tensor factors")]
    Dimension { requested: usize, available: usize },

    /// The manifold-block eigenbasis failed to re-diagonalize the full
    /// Hamiltonian to tolerance. Construction aborts; no partial state is
    /// published.
    #[error("manifold-wise diagonalization failed to reproduce the Hamiltonian; largest deviation {deviation:.3e}")]
    Diagonalization { deviation: f64 },

    /// An internal consistency check failed.
    #[error("consistency check failed: {0}")]
    Consistency(String),

    /// The configuration document could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration document is well-formed but inconsistent.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz write error: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error("npy write error: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),
}

pub type VibronicResult<T> = Result<T, VibronicError>;
