// Partitioned row collections.

use ndarray::Array2;
use rayon::prelude::*;
use std::io::{Error as IoError, ErrorKind};

use crate::vector::FeatureVector;
use crate::ThreadSafeStdError;

/// Rows split into ordered partitions.
///
/// Partitions are the unit of parallel work: aggregation and transform run one
/// rayon task per partition and combine results in partition order, so the
/// outcome does not depend on scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedVectors {
    partitions: Vec<Vec<FeatureVector>>,
}

impl PartitionedVectors {
    /// Splits `rows` into `num_partitions` contiguous slices of near-equal size.
    /// The partition count is clamped to `[1, rows.len()]`, so no partition
    /// is empty unless there are no rows at all.
    pub fn from_rows(rows: Vec<FeatureVector>, num_partitions: usize) -> Self {
        let n = rows.len();
        let num_partitions = num_partitions.clamp(1, n.max(1));
        let mut partitions: Vec<Vec<FeatureVector>> = Vec::with_capacity(num_partitions);
        let mut iter = rows.into_iter();
        for p in 0..num_partitions {
            let start = p * n / num_partitions;
            let end = (p + 1) * n / num_partitions;
            partitions.push(iter.by_ref().take(end - start).collect());
        }
        Self { partitions }
    }

    pub fn from_partitions(partitions: Vec<Vec<FeatureVector>>) -> Self {
        Self { partitions }
    }

    /// Wraps each matrix row as a dense vector and splits them into `num_partitions`.
    pub fn from_matrix(matrix: &Array2<f64>, num_partitions: usize) -> Self {
        let rows = matrix
            .rows()
            .into_iter()
            .map(|r| FeatureVector::Dense(r.to_owned()))
            .collect();
        Self::from_rows(rows, num_partitions)
    }

    pub fn partitions(&self) -> &[Vec<FeatureVector>] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &FeatureVector> {
        self.partitions.iter().flatten()
    }

    /// Dimensionality shared by every row.
    ///
    /// # Errors
    /// Returns an error when there are no rows or when rows disagree in size.
    pub fn num_features(&self) -> Result<usize, ThreadSafeStdError> {
        let first = self
            .rows()
            .next()
            .ok_or_else(|| IoError::new(ErrorKind::InvalidInput, "Input dataset has no rows."))?
            .size();
        if let Some((row_idx, bad)) = self.rows().enumerate().find(|(_, r)| r.size() != first) {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Row {} has {} features but the first row has {}.",
                    row_idx,
                    bad.size(),
                    first
                ),
            )
            .into());
        }
        Ok(first)
    }

    /// Applies `f` to every row, one rayon task per partition.
    /// The partition layout and row order are preserved.
    pub fn map_rows<F>(&self, f: F) -> Result<PartitionedVectors, ThreadSafeStdError>
    where
        F: Fn(&FeatureVector) -> Result<FeatureVector, ThreadSafeStdError> + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|part| part.iter().map(&f).collect::<Result<Vec<_>, _>>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PartitionedVectors { partitions })
    }

    /// Densifies every row into an `(n_rows, n_features)` matrix.
    pub fn to_dense_matrix(&self) -> Result<Array2<f64>, ThreadSafeStdError> {
        let n_features = self.num_features()?;
        let mut out = Array2::zeros((self.num_rows(), n_features));
        for (mut dst, row) in out.rows_mut().into_iter().zip(self.rows()) {
            for (j, v) in row.active() {
                dst[j] = v;
            }
        }
        Ok(out)
    }
}
