// Gram / covariance aggregation across partitions.

use log::{debug, info, trace};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::io::{Error as IoError, ErrorKind};

use crate::partition::PartitionedVectors;
use crate::vector::FeatureVector;
use crate::ThreadSafeStdError;

/// Largest dimensionality for which a dense `d × d` covariance is built.
pub const MAX_FEATURES: usize = 65_535;

/// Rows densified per GEMM update in the block strategy.
const BLOCK_ROWS: usize = 1024;

/// How a partition folds its rows into the scatter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GramStrategy {
    /// One rank-1 update per row over its non-zero entries.
    RankOne,
    /// Rows are stacked into dense blocks `B` and `BᵀB` is added with one GEMM.
    Block,
}

/// Partial aggregate `{n, μ, M}` of a set of rows.
///
/// With mean centering, `M = Σ(x − μ)(x − μ)ᵀ` is the scatter about the
/// partial's own mean. Partials are combined with the pairwise update
/// `M = M_a + M_b + (n_a·n_b/n)·δδᵀ`, `δ = μ_b − μ_a`, so the raw sums that
/// cancel badly for large means are never formed. Without centering, `M` is
/// the plain second moment `Σxxᵀ`.
///
/// The rank-1 path only fills the upper triangle of `scatter`;
/// [`covariance`] mirrors it, so both strategies yield a symmetric result.
///
/// [`covariance`]: GramAccumulator::covariance
#[derive(Debug, Clone)]
pub struct GramAccumulator {
    count: usize,
    mean_centering: bool,
    mean: Array1<f64>,
    scatter: Array2<f64>,
}

// Entries of a row that are not exactly zero, in index order.
fn nonzero(row: &FeatureVector) -> impl Iterator<Item = (usize, f64)> + '_ {
    row.active().filter(|&(_, v)| v != 0.0)
}

impl GramAccumulator {
    /// An empty aggregate over `n_features` columns.
    pub fn new(n_features: usize, mean_centering: bool) -> Self {
        Self {
            count: 0,
            mean_centering,
            mean: Array1::zeros(n_features),
            scatter: Array2::zeros((n_features, n_features)),
        }
    }

    /// Aggregates one partition.
    ///
    /// The partition mean is taken first, then every row is shifted by it and
    /// folded in with the given strategy. Zero entries are skipped whatever the
    /// encoding, so a sparse row and its dense twin perform exactly the same
    /// floating-point operations.
    ///
    /// # Errors
    /// Returns an error if a row does not have `n_features` columns.
    pub fn from_rows(
        rows: &[FeatureVector],
        n_features: usize,
        strategy: GramStrategy,
        mean_centering: bool,
    ) -> Result<Self, ThreadSafeStdError> {
        let mut acc = Self::new(n_features, mean_centering);
        if rows.is_empty() {
            return Ok(acc);
        }
        let mut sum = Array1::<f64>::zeros(n_features);
        for row in rows {
            acc.check_row(row)?;
            for (j, v) in nonzero(row) {
                sum[j] += v;
            }
        }
        acc.count = rows.len();
        acc.mean = sum / rows.len() as f64;

        let shift = if mean_centering {
            Some(acc.mean.clone())
        } else {
            None
        };
        match strategy {
            GramStrategy::RankOne => {
                for row in rows {
                    acc.add_rank_one(row, shift.as_ref());
                }
            }
            GramStrategy::Block => {
                for chunk in rows.chunks(BLOCK_ROWS) {
                    acc.add_block(chunk, shift.as_ref());
                }
            }
        }
        Ok(acc)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean_centering(&self) -> bool {
        self.mean_centering
    }

    fn check_row(&self, row: &FeatureVector) -> Result<(), ThreadSafeStdError> {
        if row.size() != self.n_features() {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Row has {} features, expected {}.",
                    row.size(),
                    self.n_features()
                ),
            )
            .into());
        }
        Ok(())
    }

    // Upper-triangle rank-1 update with `x − shift`.
    fn add_rank_one(&mut self, row: &FeatureVector, shift: Option<&Array1<f64>>) {
        let entries: Vec<(usize, f64)> = match shift {
            None => nonzero(row).collect(),
            Some(mu) => {
                let mut centered = mu.mapv(|m| -m);
                for (j, v) in nonzero(row) {
                    centered[j] = v - mu[j];
                }
                centered
                    .indexed_iter()
                    .filter(|&(_, &c)| c != 0.0)
                    .map(|(j, &c)| (j, c))
                    .collect()
            }
        };
        for (a, &(i, xi)) in entries.iter().enumerate() {
            for &(j, xj) in &entries[a..] {
                self.scatter[[i, j]] += xi * xj;
            }
        }
    }

    // GEMM update with a block of rows shifted by `shift`.
    fn add_block(&mut self, rows: &[FeatureVector], shift: Option<&Array1<f64>>) {
        let mut block = Array2::<f64>::zeros((rows.len(), self.n_features()));
        for (mut dst, row) in block.rows_mut().into_iter().zip(rows) {
            for (j, v) in nonzero(row) {
                dst[j] = v;
            }
        }
        if let Some(mu) = shift {
            block -= mu;
        }
        self.scatter += &block.t().dot(&block);
    }

    /// Folds another partial aggregate into this one.
    pub fn merge(&mut self, other: &GramAccumulator) -> Result<(), ThreadSafeStdError> {
        if other.n_features() != self.n_features() {
            return Err(format!(
                "Cannot merge Gram aggregates of {} and {} features.",
                self.n_features(),
                other.n_features()
            )
            .into());
        }
        if other.mean_centering != self.mean_centering {
            return Err("Cannot merge centered and uncentered Gram aggregates.".into());
        }
        if other.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            self.clone_from(other);
            return Ok(());
        }

        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = &other.mean - &self.mean;
        self.scatter += &other.scatter;
        if self.mean_centering {
            let weight = n_a * n_b / n;
            let d = self.n_features();
            for i in 0..d {
                for j in i..d {
                    self.scatter[[i, j]] += weight * delta[i] * delta[j];
                }
            }
        }
        self.mean.scaled_add(n_b / n, &delta);
        self.count += other.count;
        Ok(())
    }

    /// Column means of the aggregated rows.
    pub fn mean(&self) -> Result<Array1<f64>, ThreadSafeStdError> {
        if self.count == 0 {
            return Err("Cannot compute the mean of zero rows.".into());
        }
        Ok(self.mean.clone())
    }

    /// Sample covariance `M/(n−1)`. Without mean centering this is the scaled
    /// second moment `Σxxᵀ/(n−1)`.
    ///
    /// # Errors
    /// Returns an error if fewer than 2 rows were aggregated.
    pub fn covariance(&self) -> Result<Array2<f64>, ThreadSafeStdError> {
        let n = self.count;
        if n < 2 {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("Covariance needs at least 2 rows, got {}.", n),
            )
            .into());
        }
        let d = self.n_features();
        let mut cov = &self.scatter / (n - 1) as f64;
        for i in 1..d {
            for j in 0..i {
                cov[[i, j]] = cov[[j, i]];
            }
        }
        Ok(cov)
    }
}

/// Aggregates every partition in parallel and merges the partials in
/// partition order.
///
/// # Errors
/// Returns an error for empty or ragged input, for more than [`MAX_FEATURES`]
/// columns, or when a row fails to aggregate.
pub fn aggregate(
    data: &PartitionedVectors,
    strategy: GramStrategy,
    mean_centering: bool,
) -> Result<GramAccumulator, ThreadSafeStdError> {
    let n_features = data.num_features()?;
    if n_features > MAX_FEATURES {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!(
                "Input has {} features; at most {} are supported for a dense covariance.",
                n_features, MAX_FEATURES
            ),
        )
        .into());
    }
    debug!(
        "Aggregating Gram matrix over {} partitions ({} rows, {} features) with {:?} updates, centering={}",
        data.num_partitions(),
        data.num_rows(),
        n_features,
        strategy,
        mean_centering
    );
    let start = std::time::Instant::now();

    let partials = data
        .partitions()
        .par_iter()
        .enumerate()
        .map(|(idx, part)| -> Result<GramAccumulator, ThreadSafeStdError> {
            let acc = GramAccumulator::from_rows(part, n_features, strategy, mean_centering)?;
            trace!("Partition {} aggregated {} rows", idx, acc.count());
            Ok(acc)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = GramAccumulator::new(n_features, mean_centering);
    for partial in &partials {
        total.merge(partial)?;
    }
    info!(
        "Aggregated Gram matrix of {} rows in {:?}",
        total.count(),
        start.elapsed()
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};

    fn sample_rows() -> Vec<FeatureVector> {
        vec![
            FeatureVector::dense(vec![1.0, 0.0, 2.0]),
            FeatureVector::dense(vec![0.0, 3.0, -1.0]),
            FeatureVector::dense(vec![4.0, 1.0, 0.0]),
            FeatureVector::dense(vec![2.0, 2.0, 2.0]),
        ]
    }

    fn naive_covariance(x: &Array2<f64>) -> Array2<f64> {
        let mean = x.mean_axis(Axis(0)).unwrap();
        let centered = x - &mean;
        centered.t().dot(&centered) / (x.nrows() - 1) as f64
    }

    #[test]
    fn rank_one_and_block_match_naive_covariance() {
        let data = PartitionedVectors::from_rows(sample_rows(), 2);
        let x = data.to_dense_matrix().unwrap();
        let expected = naive_covariance(&x);

        for strategy in [GramStrategy::RankOne, GramStrategy::Block] {
            let acc = aggregate(&data, strategy, true).unwrap();
            assert_eq!(acc.count(), 4);
            let cov = acc.covariance().unwrap();
            for (a, b) in cov.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn uncentered_second_moment() {
        let data = PartitionedVectors::from_rows(sample_rows(), 2);
        let x = data.to_dense_matrix().unwrap();
        let expected = x.t().dot(&x) / 3.0;
        for strategy in [GramStrategy::RankOne, GramStrategy::Block] {
            let cov = aggregate(&data, strategy, false).unwrap().covariance().unwrap();
            for (a, b) in cov.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn large_offset_does_not_lose_precision() {
        // Small spread around a mean of 1e4 per column.
        let spread = array![
            [0.3, -1.2, 0.7],
            [1.1, 0.4, -0.5],
            [-0.8, 0.9, 0.2],
            [0.5, -0.3, -1.4],
            [-1.0, 0.6, 0.9],
            [0.2, -0.9, 0.3],
            [0.9, 1.3, -0.6]
        ];
        let x = &spread + 1.0e4;
        let expected = naive_covariance(&spread);
        let data = PartitionedVectors::from_matrix(&x, 3);

        for strategy in [GramStrategy::RankOne, GramStrategy::Block] {
            let cov = aggregate(&data, strategy, true).unwrap().covariance().unwrap();
            for (a, b) in cov.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn sparse_rows_aggregate_bitwise_like_dense_rows() {
        let dense = PartitionedVectors::from_rows(sample_rows(), 2);
        let sparse_rows = sample_rows()
            .iter()
            .map(|r| {
                let v = r.to_dense();
                let (idx, vals): (Vec<usize>, Vec<f64>) = v
                    .iter()
                    .enumerate()
                    .filter(|(_, &x)| x != 0.0)
                    .map(|(i, &x)| (i, x))
                    .unzip();
                FeatureVector::sparse(v.len(), idx, vals).unwrap()
            })
            .collect();
        let sparse = PartitionedVectors::from_rows(sparse_rows, 2);

        for strategy in [GramStrategy::RankOne, GramStrategy::Block] {
            for centering in [true, false] {
                let a = aggregate(&dense, strategy, centering).unwrap().covariance().unwrap();
                let b = aggregate(&sparse, strategy, centering).unwrap().covariance().unwrap();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn partition_count_does_not_change_result() {
        let one = aggregate(
            &PartitionedVectors::from_rows(sample_rows(), 1),
            GramStrategy::RankOne,
            true,
        )
        .unwrap();
        let four = aggregate(
            &PartitionedVectors::from_rows(sample_rows(), 4),
            GramStrategy::RankOne,
            true,
        )
        .unwrap();
        for (a, b) in one.mean().unwrap().iter().zip(four.mean().unwrap().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        let (one, four) = (one.covariance().unwrap(), four.covariance().unwrap());
        for (a, b) in one.iter().zip(four.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn empty_partitions_are_skipped() {
        let rows = sample_rows();
        let data = PartitionedVectors::from_partitions(vec![
            vec![],
            rows[..2].to_vec(),
            vec![],
            rows[2..].to_vec(),
        ]);
        let expected = naive_covariance(&data.to_dense_matrix().unwrap());
        let cov = aggregate(&data, GramStrategy::Block, true).unwrap().covariance().unwrap();
        for (a, b) in cov.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn covariance_requires_two_rows() {
        let data = PartitionedVectors::from_rows(vec![FeatureVector::dense(vec![1.0, 2.0])], 1);
        let acc = aggregate(&data, GramStrategy::Block, true).unwrap();
        assert!(acc.covariance().is_err());
    }

    #[test]
    fn rejects_more_than_max_features() {
        let rows = vec![
            FeatureVector::sparse(MAX_FEATURES + 1, vec![], vec![]).unwrap(),
            FeatureVector::sparse(MAX_FEATURES + 1, vec![], vec![]).unwrap(),
        ];
        let data = PartitionedVectors::from_rows(rows, 1);
        for strategy in [GramStrategy::RankOne, GramStrategy::Block] {
            assert!(aggregate(&data, strategy, true).is_err());
        }
    }

    #[test]
    fn merge_rejects_mismatched_aggregates() {
        let mut a = GramAccumulator::new(2, true);
        assert!(a.merge(&GramAccumulator::new(3, true)).is_err());
        assert!(a.merge(&GramAccumulator::new(2, false)).is_err());
    }

    #[test]
    fn from_rows_rejects_wrong_dimension() {
        let rows = vec![FeatureVector::dense(vec![1.0, 2.0, 3.0])];
        assert!(GramAccumulator::from_rows(&rows, 2, GramStrategy::RankOne, true).is_err());
        assert!(GramAccumulator::new(2, true).mean().is_err());
        let rows = vec![FeatureVector::dense(vec![1.0, 3.0])];
        let acc = GramAccumulator::from_rows(&rows, 2, GramStrategy::RankOne, true).unwrap();
        assert_eq!(acc.mean().unwrap(), array![1.0, 3.0]);
    }
}
