// Feature vectors: one row of input, dense or sparse.

use ndarray::{Array1, ArrayView1};
use std::io::{Error as IoError, ErrorKind};

use crate::ThreadSafeStdError;

/// One input row with a fixed dimensionality.
///
/// Both encodings describe the same mathematical vector; everything downstream
/// (Gram aggregation, projection) only ever visits the active entries, so a
/// sparse row and its densified twin produce the same numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureVector {
    Dense(Array1<f64>),
    Sparse {
        size: usize,
        indices: Vec<usize>,
        values: Vec<f64>,
    },
}

impl FeatureVector {
    pub fn dense(values: Vec<f64>) -> Self {
        FeatureVector::Dense(Array1::from(values))
    }

    /// Builds a sparse vector of length `size`.
    ///
    /// # Errors
    /// Returns an error if `indices` and `values` differ in length, if the
    /// indices are not strictly increasing, or if any index is out of range.
    pub fn sparse(
        size: usize,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, ThreadSafeStdError> {
        if indices.len() != values.len() {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Sparse vector has {} indices but {} values.",
                    indices.len(),
                    values.len()
                ),
            )
            .into());
        }
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                "Sparse vector indices must be strictly increasing.",
            )
            .into());
        }
        if let Some(&last) = indices.last() {
            if last >= size {
                return Err(IoError::new(
                    ErrorKind::InvalidInput,
                    format!("Sparse vector index {} out of range for size {}.", last, size),
                )
                .into());
            }
        }
        Ok(FeatureVector::Sparse {
            size,
            indices,
            values,
        })
    }

    /// Dimensionality of the vector.
    pub fn size(&self) -> usize {
        match self {
            FeatureVector::Dense(v) => v.len(),
            FeatureVector::Sparse { size, .. } => *size,
        }
    }

    /// Number of explicitly stored entries that are non-zero.
    pub fn num_nonzeros(&self) -> usize {
        match self {
            FeatureVector::Dense(v) => v.iter().filter(|&&x| x != 0.0).count(),
            FeatureVector::Sparse { values, .. } => values.iter().filter(|&&x| x != 0.0).count(),
        }
    }

    /// Iterates over `(index, value)` pairs of the stored entries.
    ///
    /// Dense vectors yield every position; sparse vectors yield only the
    /// stored positions, in increasing index order.
    pub fn active(&self) -> Box<dyn Iterator<Item = (usize, f64)> + '_> {
        match self {
            FeatureVector::Dense(v) => Box::new(v.iter().copied().enumerate()),
            FeatureVector::Sparse {
                indices, values, ..
            } => Box::new(indices.iter().copied().zip(values.iter().copied())),
        }
    }

    pub fn to_dense(&self) -> Array1<f64> {
        match self {
            FeatureVector::Dense(v) => v.clone(),
            FeatureVector::Sparse {
                size,
                indices,
                values,
            } => {
                let mut out = Array1::zeros(*size);
                for (&i, &v) in indices.iter().zip(values.iter()) {
                    out[i] = v;
                }
                out
            }
        }
    }

    /// Dot product with a dense vector of the same dimensionality.
    pub fn dot(&self, other: &ArrayView1<f64>) -> Result<f64, ThreadSafeStdError> {
        if other.len() != self.size() {
            return Err(format!(
                "Dot product dimension mismatch: vector has {} entries, other has {}.",
                self.size(),
                other.len()
            )
            .into());
        }
        Ok(match self {
            FeatureVector::Dense(v) => v.dot(other),
            FeatureVector::Sparse {
                indices, values, ..
            } => indices
                .iter()
                .zip(values.iter())
                .map(|(&i, &v)| v * other[i])
                .sum(),
        })
    }
}

impl From<Array1<f64>> for FeatureVector {
    fn from(values: Array1<f64>) -> Self {
        FeatureVector::Dense(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn sparse_validation_rejects_bad_input() {
        assert!(FeatureVector::sparse(5, vec![1, 3], vec![1.0]).is_err());
        assert!(FeatureVector::sparse(5, vec![3, 1], vec![1.0, 2.0]).is_err());
        assert!(FeatureVector::sparse(5, vec![1, 1], vec![1.0, 2.0]).is_err());
        assert!(FeatureVector::sparse(5, vec![1, 5], vec![1.0, 2.0]).is_err());
        assert!(FeatureVector::sparse(5, vec![], vec![]).is_ok());
    }

    #[test]
    fn sparse_and_dense_agree() {
        let sparse = FeatureVector::sparse(5, vec![1, 3], vec![-1.0, 7.0]).unwrap();
        let dense = FeatureVector::dense(vec![0.0, -1.0, 0.0, 7.0, 0.0]);

        assert_eq!(sparse.size(), 5);
        assert_eq!(sparse.num_nonzeros(), 2);
        assert_eq!(dense.num_nonzeros(), 2);
        assert_eq!(sparse.to_dense(), dense.to_dense());

        let w = array![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sparse.dot(&w.view()).unwrap(), 26.0);
        assert_eq!(dense.dot(&w.view()).unwrap(), 26.0);
    }

    #[test]
    fn dot_rejects_dimension_mismatch() {
        let v = FeatureVector::dense(vec![1.0, 2.0]);
        let w = array![1.0, 2.0, 3.0];
        assert!(v.dot(&w.view()).is_err());
    }

    #[test]
    fn active_entries_of_sparse_vector() {
        let v = FeatureVector::sparse(4, vec![0, 2], vec![2.5, -1.0]).unwrap();
        let entries: Vec<(usize, f64)> = v.active().collect();
        assert_eq!(entries, vec![(0, 2.5), (2, -1.0)]);
    }
}
