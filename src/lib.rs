// Principal component analysis over partitioned rows

#![doc = include_str!("../README.md")]

use std::error::Error;

pub mod estimator;
pub mod gram;
pub mod linalg_backends;
pub mod model;
pub mod params;
pub mod partition;
pub mod reference;
pub mod solver;
pub mod vector;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

pub use estimator::PcaEstimator;
pub use model::PcaModel;
pub use params::PcaParams;
pub use partition::PartitionedVectors;
pub use reference::RowMatrix;
pub use solver::Solver;
pub use vector::FeatureVector;
