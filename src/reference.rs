// Reference CPU row matrix used to validate the solver paths.

use ndarray::{s, Array1, Array2, Axis};
use std::io::{Error as IoError, ErrorKind};

use crate::gram::MAX_FEATURES;
use crate::linalg_backends::{BackendSVD, NdarrayLinAlgBackend};
use crate::partition::PartitionedVectors;
use crate::solver::select_top_k;
use crate::ThreadSafeStdError;

/// Truncated singular value decomposition `A ≈ U·diag(s)·Vᵀ`.
#[derive(Debug, Clone)]
pub struct SingularValueDecomposition {
    /// Shape: (n_rows, k), present when requested.
    pub u: Option<Array2<f64>>,
    /// Shape: (k), descending.
    pub s: Array1<f64>,
    /// Shape: (n_cols, k)
    pub v: Array2<f64>,
}

/// Dense, row-oriented matrix with two-pass statistics.
///
/// Covariance is computed by explicit centering and a full product, then
/// decomposed with a LAPACK SVD. None of the Gram aggregation code is shared
/// with the estimator.
#[derive(Debug, Clone)]
pub struct RowMatrix {
    rows: Array2<f64>,
}

impl RowMatrix {
    pub fn new(rows: Array2<f64>) -> Self {
        Self { rows }
    }

    pub fn from_partitions(data: &PartitionedVectors) -> Result<Self, ThreadSafeStdError> {
        Ok(Self {
            rows: data.to_dense_matrix()?,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.nrows()
    }

    pub fn num_cols(&self) -> usize {
        self.rows.ncols()
    }

    pub fn rows(&self) -> &Array2<f64> {
        &self.rows
    }

    /// Sample covariance of the columns.
    pub fn compute_covariance(&self) -> Result<Array2<f64>, ThreadSafeStdError> {
        let (n, d) = self.rows.dim();
        if n < 2 {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("Covariance needs at least 2 rows, got {}.", n),
            )
            .into());
        }
        if d > MAX_FEATURES {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("Cannot compute a covariance with {} > {} columns.", d, MAX_FEATURES),
            )
            .into());
        }
        let mean = self
            .rows
            .mean_axis(Axis(0))
            .ok_or("Failed to compute mean of the rows.")?;
        let centered = &self.rows - &mean;
        Ok(centered.t().dot(&centered) / (n - 1) as f64)
    }

    /// Top-k principal components, shape (n_cols, k), and the proportion of
    /// variance each explains, shape (k).
    ///
    /// Components come from the SVD of the covariance and follow the
    /// largest-entry-positive sign convention.
    pub fn compute_principal_components_and_explained_variance(
        &self,
        k: usize,
    ) -> Result<(Array2<f64>, Array1<f64>), ThreadSafeStdError> {
        let d = self.num_cols();
        if k == 0 || k > d {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("k must be in [1, {}], got {}.", d, k),
            )
            .into());
        }
        let covariance = self.compute_covariance()?;
        let svd = NdarrayLinAlgBackend
            .svd(&covariance, true, false)
            .map_err(|e| format!("SVD of reference covariance failed: {}", e))?;
        let u = svd.u.ok_or("SVD did not return left singular vectors.")?;
        let top = select_top_k(&svd.s, &u, k, true);
        Ok((top.pc, top.explained_variance))
    }

    pub fn compute_principal_components(
        &self,
        k: usize,
    ) -> Result<Array2<f64>, ThreadSafeStdError> {
        Ok(self.compute_principal_components_and_explained_variance(k)?.0)
    }

    /// Rank-k SVD of the (uncentered) rows.
    pub fn compute_svd(
        &self,
        k: usize,
        compute_u: bool,
    ) -> Result<SingularValueDecomposition, ThreadSafeStdError> {
        let (n, d) = self.rows.dim();
        let max_rank = n.min(d);
        if k == 0 || k > max_rank {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("k must be in [1, {}], got {}.", max_rank, k),
            )
            .into());
        }
        let svd = NdarrayLinAlgBackend
            .svd(&self.rows, compute_u, true)
            .map_err(|e| format!("SVD of reference rows failed: {}", e))?;
        let vt = svd.vt.ok_or("SVD did not return right singular vectors.")?;
        Ok(SingularValueDecomposition {
            u: svd.u.map(|u| u.slice(s![.., ..k]).to_owned()),
            s: svd.s.slice(s![..k]).to_owned(),
            v: vt.slice(s![..k, ..]).t().to_owned(),
        })
    }

    /// `rows · rhs`, shape (n_rows, rhs.ncols()).
    pub fn multiply(&self, rhs: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if rhs.nrows() != self.num_cols() {
            return Err(format!(
                "Cannot multiply a {}x{} row matrix by a {}x{} matrix.",
                self.num_rows(),
                self.num_cols(),
                rhs.nrows(),
                rhs.ncols()
            )
            .into());
        }
        Ok(self.rows.dot(rhs))
    }
}
