// Fitted PCA model: projection and persistence.

use float_cmp::approx_eq;
use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::params::PcaParams;
use crate::partition::PartitionedVectors;
use crate::vector::FeatureVector;
use crate::ThreadSafeStdError;

/// Bumped whenever the persisted layout of [`PcaModel`] changes.
const MODEL_FORMAT_VERSION: u32 = 1;

/// A fitted principal component model.
///
/// Holds the component matrix and the proportion of variance each component
/// explains. The model is immutable once built; it is produced by
/// [`PcaEstimator::fit`](crate::PcaEstimator::fit), by
/// [`PcaModel::with_components`], or by [`PcaModel::load_model`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PcaModel {
    uid: String,
    params: PcaParams,
    /// The principal components, one per column.
    /// Shape: (n_features, k)
    pc: Array2<f64>,
    /// Proportion of total variance explained by each component, descending.
    /// Shape: (k)
    explained_variance: Array1<f64>,
}

#[derive(Serialize)]
struct ModelFileRef<'a> {
    format_version: u32,
    model: &'a PcaModel,
}

#[derive(Deserialize)]
struct ModelFile {
    format_version: u32,
    model: PcaModel,
}

impl PcaModel {
    /// Creates a model from externally computed components.
    ///
    /// * `pc` - Component matrix, shape (n_features, k).
    /// * `explained_variance` - Variance proportions, shape (k).
    ///
    /// # Errors
    /// Returns an error if the uid is empty, the shapes disagree with each
    /// other or with `params.k`, or the explained variance contains negative
    /// or non-finite values or is not in descending order.
    pub fn with_components(
        uid: impl Into<String>,
        params: PcaParams,
        pc: Array2<f64>,
        explained_variance: Array1<f64>,
    ) -> Result<Self, ThreadSafeStdError> {
        let model = PcaModel {
            uid: uid.into(),
            params,
            pc,
            explained_variance,
        };
        model.check_consistency()?;
        if !model.is_orthonormal(1e-6) {
            warn!(
                "Model {} was built from components that are not orthonormal.",
                model.uid
            );
        }
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), ThreadSafeStdError> {
        if self.uid.trim().is_empty() {
            return Err("PCA model uid must not be empty.".into());
        }
        if self.explained_variance.len() != self.pc.ncols() {
            return Err(format!(
                "PCA model has inconsistent dimensions: explained_variance length ({}) does not match number of components ({}).",
                self.explained_variance.len(),
                self.pc.ncols()
            )
            .into());
        }
        if let Some(k) = self.params.k {
            if k != self.pc.ncols() {
                return Err(format!(
                    "PCA model params request k = {} but the component matrix has {} columns.",
                    k,
                    self.pc.ncols()
                )
                .into());
            }
        }
        if self.pc.iter().any(|v| !v.is_finite()) {
            return Err("PCA model component matrix contains non-finite values.".into());
        }
        if self
            .explained_variance
            .iter()
            .any(|&v| !v.is_finite() || v < 0.0)
        {
            return Err(
                "PCA model explained_variance contains invalid (non-finite or negative) values."
                    .into(),
            );
        }
        if self
            .explained_variance
            .windows(2)
            .into_iter()
            .any(|w| w[0] < w[1])
        {
            return Err("PCA model explained_variance is not in descending order.".into());
        }
        Ok(())
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn params(&self) -> &PcaParams {
        &self.params
    }

    /// The component matrix, shape (n_features, k).
    pub fn pc(&self) -> &Array2<f64> {
        &self.pc
    }

    /// Proportion of total variance per component, shape (k).
    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn num_features(&self) -> usize {
        self.pc.nrows()
    }

    pub fn k(&self) -> usize {
        self.pc.ncols()
    }

    /// Whether `pcᵀ·pc` is the identity within `tolerance`.
    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        let gram = self.pc.t().dot(&self.pc);
        gram.indexed_iter().all(|((i, j), &x)| {
            let expected = if i == j { 1.0 } else { 0.0 };
            approx_eq!(f64, x, expected, epsilon = tolerance)
        })
    }

    fn check_dimension(&self, n_input_features: usize) -> Result<(), ThreadSafeStdError> {
        if n_input_features != self.num_features() {
            return Err(format!(
                "Input data feature dimension ({}) does not match model's feature dimension ({}).",
                n_input_features,
                self.num_features()
            )
            .into());
        }
        Ok(())
    }

    /// Projects one vector onto the components: `pcᵀ·x`.
    ///
    /// The input is not centered, so the projection equals the row of `X·pc`.
    /// Dense and sparse encodings of the same row give identical output.
    pub fn transform_vector(&self, x: &FeatureVector) -> Result<Array1<f64>, ThreadSafeStdError> {
        self.check_dimension(x.size())?;
        Ok(self.project_entries(x.active()))
    }

    // Sums `x_i · pc[i, ..]` over non-zero entries in index order.
    fn project_entries(&self, entries: impl Iterator<Item = (usize, f64)>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.k());
        for (i, v) in entries.filter(|&(_, v)| v != 0.0) {
            out.scaled_add(v, &self.pc.row(i));
        }
        out
    }

    /// Projects every row, one rayon task per partition, keeping the layout.
    /// Output rows are dense vectors of length k.
    pub fn transform(
        &self,
        data: &PartitionedVectors,
    ) -> Result<PartitionedVectors, ThreadSafeStdError> {
        let start = std::time::Instant::now();
        let out = data.map_rows(|row| Ok(FeatureVector::Dense(self.transform_vector(row)?)))?;
        debug!(
            "Model {} projected {} rows onto {} components in {:?}",
            self.uid,
            out.num_rows(),
            self.k(),
            start.elapsed()
        );
        Ok(out)
    }

    /// Projects the rows of `x`, shape (m_samples, n_features) -> (m_samples, k).
    pub fn transform_matrix(&self, x: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        self.check_dimension(x.len_of(Axis(1)))?;
        let mut out = Array2::<f64>::zeros((x.nrows(), self.k()));
        for (mut dst, row) in out.rows_mut().into_iter().zip(x.rows()) {
            dst.assign(&self.project_entries(row.iter().copied().enumerate()));
        }
        Ok(out)
    }

    /// Saves the model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if file I/O or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create file at {:?}: {}", path.as_ref(), e))?;
        let mut writer = BufWriter::new(file);
        let envelope = ModelFileRef {
            format_version: MODEL_FORMAT_VERSION,
            model: self,
        };
        bincode::serde::encode_into_std_write(&envelope, &mut writer, bincode::config::standard())
            .map_err(|e| format!("Failed to serialize PCA model: {}", e))?;
        debug!("Saved PCA model {} to {:?}", self.uid, path.as_ref());
        Ok(())
    }

    /// Loads a model previously written by [`save_model`](Self::save_model).
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, if the file was
    /// written with a different format version, or if the loaded model is
    /// internally inconsistent.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, ThreadSafeStdError> {
        let file = File::open(path.as_ref())
            .map_err(|e| format!("Failed to open file at {:?}: {}", path.as_ref(), e))?;
        let mut reader = BufReader::new(file);
        let envelope: ModelFile =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| format!("Failed to deserialize PCA model: {}", e))?;
        if envelope.format_version != MODEL_FORMAT_VERSION {
            return Err(format!(
                "Unsupported PCA model format version {} (expected {}).",
                envelope.format_version, MODEL_FORMAT_VERSION
            )
            .into());
        }
        let model = envelope.model;
        model
            .check_consistency()
            .map_err(|e| format!("Loaded PCA model is invalid: {}", e))?;
        Ok(model)
    }
}
