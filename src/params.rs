// Estimator parameters.

use serde::{Deserialize, Serialize};
use std::io::{Error as IoError, ErrorKind};

use crate::solver::Solver;
use crate::ThreadSafeStdError;

/// Configuration shared by [`PcaEstimator`](crate::PcaEstimator) and the
/// models it fits.
///
/// `input_col` and `output_col` are carried as metadata for callers that feed
/// the estimator from named columns; the estimator itself works on rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaParams {
    /// Number of principal components to keep. Must be set before fitting.
    pub k: Option<usize>,
    pub solver: Solver,
    /// Subtract column means when forming the covariance.
    pub mean_centering: bool,
    pub input_col: String,
    pub output_col: String,
}

impl Default for PcaParams {
    fn default() -> Self {
        PcaParams {
            k: None,
            solver: Solver::Generic,
            mean_centering: true,
            input_col: "features".to_string(),
            output_col: "pca_features".to_string(),
        }
    }
}

impl PcaParams {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_mean_centering(mut self, mean_centering: bool) -> Self {
        self.mean_centering = mean_centering;
        self
    }

    pub fn with_input_col(mut self, input_col: impl Into<String>) -> Self {
        self.input_col = input_col.into();
        self
    }

    pub fn with_output_col(mut self, output_col: impl Into<String>) -> Self {
        self.output_col = output_col.into();
        self
    }

    /// Checks the parameters that do not depend on the data.
    pub fn validate(&self) -> Result<(), ThreadSafeStdError> {
        match self.k {
            None => return Err(invalid("Parameter k must be set before fitting.")),
            Some(0) => return Err(invalid("Parameter k must be at least 1.")),
            Some(_) => {}
        }
        if self.input_col.trim().is_empty() {
            return Err(invalid("Parameter input_col must not be empty."));
        }
        if self.output_col.trim().is_empty() {
            return Err(invalid("Parameter output_col must not be empty."));
        }
        if self.input_col == self.output_col {
            return Err(invalid(format!(
                "Parameters input_col and output_col must differ, both are '{}'.",
                self.input_col
            )));
        }
        Ok(())
    }

    /// Runs [`validate`](Self::validate) and checks `k` against the input
    /// dimensionality. Returns the validated `k`.
    pub fn validate_for(&self, num_features: usize) -> Result<usize, ThreadSafeStdError> {
        self.validate()?;
        let k = self.k.unwrap_or_default();
        if k > num_features {
            return Err(invalid(format!(
                "Parameter k ({}) must not exceed the number of features ({}).",
                k, num_features
            )));
        }
        Ok(k)
    }
}

fn invalid(msg: impl Into<String>) -> ThreadSafeStdError {
    IoError::new(ErrorKind::InvalidInput, msg.into()).into()
}
