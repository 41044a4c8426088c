// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh as NdLinalgEigh, SVD as NdLinalgSVD, UPLO};
use std::error::Error;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVD).
/// Implementers read the upper triangle of `matrix`.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, Box<dyn Error + Send + Sync>>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    /// Singular values in descending order.
    pub s: Array1<F>,
    pub vt: Option<Array2<F>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd(
        &self,
        matrix: &Array2<F>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput<F>, Box<dyn Error + Send + Sync>>;
}

// --- NdarrayLinAlgBackend: LAPACK through ndarray-linalg ---

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(
        &self,
        matrix: &Array2<f64>,
    ) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        if matrix.is_empty() {
            return Ok(EighOutput {
                eigenvalues: Array1::zeros(0),
                eigenvectors: Array2::zeros((0, 0)),
            });
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn svd(
        &self,
        matrix: &Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SVDOutput<f64>, Box<dyn Error + Send + Sync>> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k_dim = nrows.min(ncols);
            return Ok(SVDOutput {
                u: if compute_u { Some(Array2::zeros((nrows, nrows))) } else { None },
                s: Array1::zeros(k_dim),
                vt: if compute_v { Some(Array2::zeros((ncols, ncols))) } else { None },
            });
        }
        let (u, s, vt) = NdLinalgSVD::svd(matrix, compute_u, compute_v).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}

// --- JacobiEighBackend: cyclic Jacobi rotations ---

/// Symmetric eigensolver based on cyclic Jacobi sweeps, the scheme batched
/// GPU solvers (`syevj`) are built on.
///
/// Each sweep visits every off-diagonal pair `(p, q)` once and applies the
/// Givens rotation that annihilates it. Iteration stops once the off-diagonal
/// Frobenius norm drops below `tolerance` times the matrix norm. Eigenvector
/// signs are whatever the rotation sequence produces.
#[derive(Debug, Copy, Clone)]
pub struct JacobiEighBackend {
    pub max_sweeps: usize,
    pub tolerance: f64,
}

impl Default for JacobiEighBackend {
    fn default() -> Self {
        Self { max_sweeps: 100, tolerance: 1e-14 }
    }
}

fn off_diagonal_norm(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut acc = 0.0;
    for p in 0..n {
        for q in (p + 1)..n {
            acc += a[[p, q]] * a[[p, q]];
        }
    }
    (2.0 * acc).sqrt()
}

impl BackendEigh<f64> for JacobiEighBackend {
    fn eigh_upper(
        &self,
        matrix: &Array2<f64>,
    ) -> Result<EighOutput<f64>, Box<dyn Error + Send + Sync>> {
        let (n, ncols) = matrix.dim();
        if n != ncols {
            return Err(format!(
                "Matrix must be square for eigendecomposition, got {}x{}.",
                n, ncols
            )
            .into());
        }
        if n == 0 {
            return Ok(EighOutput {
                eigenvalues: Array1::zeros(0),
                eigenvectors: Array2::zeros((0, 0)),
            });
        }

        // Work on a symmetric copy built from the upper triangle.
        let mut a = matrix.clone();
        for i in 1..n {
            for j in 0..i {
                a[[i, j]] = a[[j, i]];
            }
        }
        let mut v = Array2::<f64>::eye(n);
        let frob = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        if !frob.is_finite() {
            return Err("Jacobi eigensolver received non-finite matrix entries.".into());
        }
        let threshold = self.tolerance * frob;

        let mut converged = off_diagonal_norm(&a) <= threshold;
        let mut sweeps = 0;
        while !converged && sweeps < self.max_sweeps {
            for p in 0..n - 1 {
                for q in (p + 1)..n {
                    let apq = a[[p, q]];
                    if apq == 0.0 {
                        continue;
                    }
                    let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                    let t = if theta.abs() > 1e150 {
                        0.5 / theta
                    } else {
                        theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                    };
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    for k in 0..n {
                        let akp = a[[k, p]];
                        let akq = a[[k, q]];
                        a[[k, p]] = c * akp - s * akq;
                        a[[k, q]] = s * akp + c * akq;
                    }
                    for k in 0..n {
                        let apk = a[[p, k]];
                        let aqk = a[[q, k]];
                        a[[p, k]] = c * apk - s * aqk;
                        a[[q, k]] = s * apk + c * aqk;
                    }
                    a[[p, q]] = 0.0;
                    a[[q, p]] = 0.0;
                    for k in 0..n {
                        let vkp = v[[k, p]];
                        let vkq = v[[k, q]];
                        v[[k, p]] = c * vkp - s * vkq;
                        v[[k, q]] = s * vkp + c * vkq;
                    }
                }
            }
            sweeps += 1;
            converged = off_diagonal_norm(&a) <= threshold;
        }
        if !converged {
            return Err(format!(
                "Jacobi eigensolver did not converge within {} sweeps (off-diagonal norm {:e}).",
                self.max_sweeps,
                off_diagonal_norm(&a)
            )
            .into());
        }
        log::trace!("Jacobi eigensolver converged after {} sweeps for n={}", sweeps, n);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| {
            a[[i, i]]
                .partial_cmp(&a[[j, j]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let eigenvalues = Array1::from_iter(order.iter().map(|&i| a[[i, i]]));
        let mut eigenvectors = Array2::<f64>::zeros((n, n));
        for (dst, &src) in order.iter().enumerate() {
            eigenvectors.column_mut(dst).assign(&v.column(src));
        }
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn assert_decomposes(matrix: &Array2<f64>, out: &EighOutput<f64>) {
        let n = matrix.nrows();
        for i in 0..n {
            let v = out.eigenvectors.column(i);
            let av = matrix.dot(&v);
            for k in 0..n {
                assert_abs_diff_eq!(av[k], out.eigenvalues[i] * v[k], epsilon = 1e-10);
            }
        }
        let vtv = out.eigenvectors.t().dot(&out.eigenvectors);
        for ((i, j), x) in vtv.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(*x, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn jacobi_known_2x2() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let out = JacobiEighBackend::default().eigh_upper(&m).unwrap();
        assert_abs_diff_eq!(out.eigenvalues[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.eigenvalues[1], 3.0, epsilon = 1e-12);
        assert_decomposes(&m, &out);
    }

    #[test]
    fn jacobi_matches_lapack_eigenvalues() {
        let m = array![
            [4.0, 1.0, -2.0, 0.5],
            [1.0, 3.0, 0.0, 1.5],
            [-2.0, 0.0, 5.0, -1.0],
            [0.5, 1.5, -1.0, 2.0]
        ];
        let jacobi = JacobiEighBackend::default().eigh_upper(&m).unwrap();
        let lapack = NdarrayLinAlgBackend.eigh_upper(&m).unwrap();
        for (a, b) in jacobi.eigenvalues.iter().zip(lapack.eigenvalues.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        assert_decomposes(&m, &jacobi);
        let trace: f64 = m.diag().sum();
        assert_abs_diff_eq!(jacobi.eigenvalues.sum(), trace, epsilon = 1e-10);
    }

    #[test]
    fn jacobi_reads_only_upper_triangle() {
        let full = array![[2.0, 1.0], [1.0, 2.0]];
        let upper = array![[2.0, 1.0], [0.0, 2.0]];
        let a = JacobiEighBackend::default().eigh_upper(&full).unwrap();
        let b = JacobiEighBackend::default().eigh_upper(&upper).unwrap();
        assert_eq!(a.eigenvalues, b.eigenvalues);
    }

    #[test]
    fn jacobi_diagonal_and_empty() {
        let m = array![[3.0, 0.0], [0.0, 1.0]];
        let out = JacobiEighBackend::default().eigh_upper(&m).unwrap();
        assert_eq!(out.eigenvalues, array![1.0, 3.0]);

        let empty = Array2::<f64>::zeros((0, 0));
        let out = JacobiEighBackend::default().eigh_upper(&empty).unwrap();
        assert_eq!(out.eigenvalues.len(), 0);
    }

    #[test]
    fn jacobi_rejects_non_square() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(JacobiEighBackend::default().eigh_upper(&m).is_err());
    }

    #[test]
    fn svd_singular_values_descending() {
        let m = array![[3.0, 0.0], [0.0, 4.0], [0.0, 0.0]];
        let out = NdarrayLinAlgBackend.svd(&m, true, true).unwrap();
        assert_abs_diff_eq!(out.s[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.s[1], 3.0, epsilon = 1e-12);
        assert_eq!(out.u.unwrap().dim(), (3, 3));
        assert_eq!(out.vt.unwrap().dim(), (2, 2));
    }
}
