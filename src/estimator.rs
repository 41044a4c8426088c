// PCA estimator: validates parameters, aggregates, solves.

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::gram;
use crate::model::PcaModel;
use crate::params::PcaParams;
use crate::partition::PartitionedVectors;
use crate::solver::{self, Solver};
use crate::ThreadSafeStdError;

const ESTIMATOR_FORMAT_VERSION: u32 = 1;

/// Generates an identifier of the form `<prefix>_<12 hex digits>`.
pub fn random_uid(prefix: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen::<u64>() & 0xffff_ffff_ffff;
    format!("{}_{:012x}", prefix, suffix)
}

/// Fits [`PcaModel`]s from partitioned rows.
///
/// # Examples
///
/// ```no_run
/// use accelerated_pca::{FeatureVector, PartitionedVectors, PcaEstimator, Solver};
///
/// let rows = vec![
///     FeatureVector::dense(vec![1.0, 2.0, 0.0]),
///     FeatureVector::dense(vec![2.0, 1.0, 1.0]),
///     FeatureVector::sparse(3, vec![1], vec![4.0]).unwrap(),
/// ];
/// let data = PartitionedVectors::from_rows(rows, 2);
/// let model = PcaEstimator::new()
///     .with_k(2)
///     .with_solver(Solver::Gemm)
///     .fit(&data)
///     .unwrap();
/// let projected = model.transform(&data).unwrap();
/// assert_eq!(projected.num_rows(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PcaEstimator {
    uid: String,
    params: PcaParams,
}

#[derive(Serialize)]
struct EstimatorFileRef<'a> {
    format_version: u32,
    uid: &'a str,
    params: &'a PcaParams,
}

#[derive(Deserialize)]
struct EstimatorFile {
    format_version: u32,
    uid: String,
    params: PcaParams,
}

impl Default for PcaEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PcaEstimator {
    pub fn new() -> Self {
        Self {
            uid: random_uid("pca"),
            params: PcaParams::default(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_params(mut self, params: PcaParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.params.k = Some(k);
        self
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.params.solver = solver;
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn params(&self) -> &PcaParams {
        &self.params
    }

    /// Fits the top-k principal components of `data`.
    ///
    /// The rows are folded into a centered scatter matrix partition by
    /// partition (rank-1 or GEMM updates, depending on the solver), turned
    /// into a covariance, and decomposed by the configured solver.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid, if `k` exceeds the
    /// number of features, if there are fewer than 2 rows, or if the
    /// decomposition fails.
    pub fn fit(&self, data: &PartitionedVectors) -> Result<PcaModel, ThreadSafeStdError> {
        self.params.validate()?;
        let n_features = data.num_features()?;
        let k = self.params.validate_for(n_features)?;
        let solver = self.params.solver;

        info!(
            "Fitting PCA {}: k={}, solver={}, rows={}, features={}, partitions={}",
            self.uid,
            k,
            solver,
            data.num_rows(),
            n_features,
            data.num_partitions()
        );
        let start = std::time::Instant::now();

        let aggregate =
            gram::aggregate(data, solver.gram_strategy(), self.params.mean_centering)?;
        let covariance = aggregate.covariance()?;
        debug!("Covariance matrix ready after {:?}", start.elapsed());

        let components = solver::principal_components(&covariance, k, solver)?;
        let model = PcaModel::with_components(
            self.uid.clone(),
            self.params.clone(),
            components.pc,
            components.explained_variance,
        )?;
        info!("Fitted PCA {} in {:?}", self.uid, start.elapsed());
        Ok(model)
    }

    /// Saves the estimator's uid and parameters using bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create file at {:?}: {}", path.as_ref(), e))?;
        let mut writer = BufWriter::new(file);
        let envelope = EstimatorFileRef {
            format_version: ESTIMATOR_FORMAT_VERSION,
            uid: &self.uid,
            params: &self.params,
        };
        bincode::serde::encode_into_std_write(&envelope, &mut writer, bincode::config::standard())
            .map_err(|e| format!("Failed to serialize PCA estimator: {}", e))?;
        Ok(())
    }

    /// Loads an estimator written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ThreadSafeStdError> {
        let file = File::open(path.as_ref())
            .map_err(|e| format!("Failed to open file at {:?}: {}", path.as_ref(), e))?;
        let mut reader = BufReader::new(file);
        let envelope: EstimatorFile =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| format!("Failed to deserialize PCA estimator: {}", e))?;
        if envelope.format_version != ESTIMATOR_FORMAT_VERSION {
            return Err(format!(
                "Unsupported PCA estimator format version {} (expected {}).",
                envelope.format_version, ESTIMATOR_FORMAT_VERSION
            )
            .into());
        }
        if envelope.uid.trim().is_empty() {
            return Err("Loaded PCA estimator has an empty uid.".into());
        }
        Ok(Self {
            uid: envelope.uid,
            params: envelope.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FeatureVector;
    use tempfile::NamedTempFile;

    fn data() -> PartitionedVectors {
        PartitionedVectors::from_rows(
            vec![
                FeatureVector::dense(vec![2.0, 0.0, 1.0]),
                FeatureVector::dense(vec![0.0, 1.0, 3.0]),
                FeatureVector::dense(vec![4.0, 2.0, 0.5]),
                FeatureVector::dense(vec![1.0, 5.0, 2.0]),
            ],
            2,
        )
    }

    #[test]
    fn uid_format() {
        let uid = random_uid("pca");
        assert!(uid.starts_with("pca_"));
        assert_eq!(uid.len(), "pca_".len() + 12);
        assert!(uid["pca_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(PcaEstimator::new().uid(), "");
    }

    #[test]
    fn fit_requires_k() {
        assert!(PcaEstimator::new().fit(&data()).is_err());
    }

    #[test]
    fn fit_rejects_k_above_dimensionality() {
        assert!(PcaEstimator::new().with_k(4).fit(&data()).is_err());
    }

    #[test]
    fn fit_rejects_single_row() {
        let one = PartitionedVectors::from_rows(vec![FeatureVector::dense(vec![1.0, 2.0])], 1);
        assert!(PcaEstimator::new().with_k(1).fit(&one).is_err());
    }

    #[test]
    fn fit_rejects_too_many_features() {
        let width = crate::gram::MAX_FEATURES + 1;
        let wide = PartitionedVectors::from_rows(
            vec![
                FeatureVector::sparse(width, vec![], vec![]).unwrap(),
                FeatureVector::sparse(width, vec![0], vec![1.0]).unwrap(),
            ],
            1,
        );
        assert!(PcaEstimator::new().with_k(1).fit(&wide).is_err());
    }

    #[test]
    fn fitted_model_carries_uid_and_params() {
        let estimator = PcaEstimator::new()
            .with_uid("pca_fixed")
            .with_k(2)
            .with_solver(Solver::Gemm);
        let model = estimator.fit(&data()).unwrap();
        assert_eq!(model.uid(), "pca_fixed");
        assert_eq!(model.params(), estimator.params());
        assert_eq!(model.pc().dim(), (3, 2));
        assert_eq!(model.explained_variance().len(), 2);
        assert!(model.is_orthonormal(1e-10));
    }

    #[test]
    fn save_load_round_trip() -> Result<(), ThreadSafeStdError> {
        let estimator = PcaEstimator::new()
            .with_k(3)
            .with_params(
                PcaParams::default()
                    .with_k(3)
                    .with_solver(Solver::Jacobi)
                    .with_mean_centering(false)
                    .with_input_col("vectors"),
            );
        let temp_file = NamedTempFile::new()?;
        estimator.save(temp_file.path())?;
        let loaded = PcaEstimator::load(temp_file.path())?;
        assert_eq!(loaded, estimator);
        Ok(())
    }
}
