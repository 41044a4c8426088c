// Top-k eigen solvers over an aggregated covariance matrix.

use log::{debug, warn};
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Error as IoError, ErrorKind};
use std::str::FromStr;

use crate::gram::GramStrategy;
use crate::linalg_backends::{BackendEigh, BackendSVD, JacobiEighBackend, NdarrayLinAlgBackend};
use crate::ThreadSafeStdError;

/// Which code path computes the principal components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Solver {
    /// Rank-1 Gram updates followed by an SVD of the covariance.
    #[default]
    Generic,
    /// Block GEMM Gram updates followed by a LAPACK symmetric eigendecomposition.
    Gemm,
    /// Rank-1 Gram updates followed by cyclic Jacobi sweeps.
    /// Component signs are not normalised on this path.
    Jacobi,
}

impl Solver {
    pub const ALL: [Solver; 3] = [Solver::Generic, Solver::Gemm, Solver::Jacobi];

    pub fn gram_strategy(self) -> GramStrategy {
        match self {
            Solver::Gemm => GramStrategy::Block,
            Solver::Generic | Solver::Jacobi => GramStrategy::RankOne,
        }
    }

    /// Whether component signs follow the deterministic convention of [`flip_signs`].
    pub fn normalizes_signs(self) -> bool {
        !matches!(self, Solver::Jacobi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Solver::Generic => "generic",
            Solver::Gemm => "gemm",
            Solver::Jacobi => "jacobi",
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Solver {
    type Err = ThreadSafeStdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "default" => Ok(Solver::Generic),
            "gemm" => Ok(Solver::Gemm),
            "jacobi" | "cusolver" => Ok(Solver::Jacobi),
            other => Err(IoError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Unknown solver '{}'; expected one of generic, gemm, jacobi.",
                    other
                ),
            )
            .into()),
        }
    }
}

/// Top-k principal directions and the share of variance each one explains.
#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    /// Shape: (n_features, k)
    pub pc: Array2<f64>,
    /// Shape: (k), descending, non-negative.
    pub explained_variance: Array1<f64>,
}

/// Makes the largest-magnitude entry of every column positive.
pub fn flip_signs(pc: &mut Array2<f64>) {
    for mut column in pc.axis_iter_mut(Axis(1)) {
        let mut pivot = 0.0f64;
        for &x in column.iter() {
            if x.abs() > pivot.abs() {
                pivot = x;
            }
        }
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
}

/// Turns eigenpairs sorted by descending eigenvalue into the top-k result.
///
/// Eigenvalues are clamped at zero before the variance ratios are formed,
/// and the ratio denominator is the sum over all `d` eigenvalues.
pub(crate) fn select_top_k(
    descending_values: &Array1<f64>,
    descending_vectors: &Array2<f64>,
    k: usize,
    normalize_signs: bool,
) -> PrincipalComponents {
    let values = descending_values.mapv(|v| v.max(0.0));
    let total: f64 = values.sum();
    let explained_variance = if total > 0.0 {
        values.slice(s![..k]).mapv(|v| v / total)
    } else {
        warn!("Total variance is zero; explained variance set to zeros.");
        Array1::zeros(k)
    };
    let mut pc = descending_vectors.slice(s![.., ..k]).to_owned();
    if normalize_signs {
        flip_signs(&mut pc);
    }
    PrincipalComponents {
        pc,
        explained_variance,
    }
}

/// Computes the top-`k` principal components of a symmetric covariance matrix.
///
/// # Errors
/// Returns an error if the matrix is not square, if `k` is 0 or exceeds the
/// dimensionality, or if the underlying decomposition fails.
pub fn principal_components(
    covariance: &Array2<f64>,
    k: usize,
    solver: Solver,
) -> Result<PrincipalComponents, ThreadSafeStdError> {
    let (d, ncols) = covariance.dim();
    if d != ncols {
        return Err(format!("Covariance matrix must be square, got {}x{}.", d, ncols).into());
    }
    if k == 0 || k > d {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("k must be in [1, {}], got {}.", d, k),
        )
        .into());
    }
    let start = std::time::Instant::now();

    let (values, vectors) = match solver {
        Solver::Generic => {
            let svd = NdarrayLinAlgBackend
                .svd(covariance, true, false)
                .map_err(|e| format!("SVD of covariance matrix failed: {}", e))?;
            let u = svd.u.ok_or("SVD did not return left singular vectors.")?;
            (svd.s, u)
        }
        Solver::Gemm => {
            let eig = NdarrayLinAlgBackend
                .eigh_upper(covariance)
                .map_err(|e| format!("Eigen decomposition of covariance matrix failed: {}", e))?;
            reverse_eigenpairs(eig.eigenvalues, eig.eigenvectors)
        }
        Solver::Jacobi => {
            let eig = JacobiEighBackend::default()
                .eigh_upper(covariance)
                .map_err(|e| {
                    format!("Jacobi eigen decomposition of covariance matrix failed: {}", e)
                })?;
            reverse_eigenpairs(eig.eigenvalues, eig.eigenvectors)
        }
    };

    let result = select_top_k(&values, &vectors, k, solver.normalizes_signs());
    debug!(
        "{} solver extracted {} of {} components in {:?}",
        solver,
        k,
        d,
        start.elapsed()
    );
    Ok(result)
}

fn reverse_eigenpairs(values: Array1<f64>, vectors: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    (
        values.slice(s![..;-1]).to_owned(),
        vectors.slice(s![.., ..;-1]).to_owned(),
    )
}
