//! Error types for toolpath generation.

use millpath_parallel::ParallelError;
use thiserror::Error;

/// Errors that can occur while generating a toolpath.
///
/// Geometric degeneracy never surfaces here; the kernel reports it as "no
/// contact". Cancellation is not an error either.
#[derive(Error, Debug)]
pub enum CamError {
    /// Cutter dimensions are out of range.
    #[error("invalid cutter: {0}")]
    InvalidCutter(String),

    /// Generation settings are out of range or contradictory.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The processing box has no extent on a required axis.
    #[error("processing bounds are empty: {0}")]
    EmptyBounds(String),

    /// The model has no triangles.
    #[error("model is empty")]
    EmptyModel,

    /// A grid line or layer task failed on a worker.
    #[error("task {index} failed: {message}")]
    TaskFailed {
        /// Index of the line or layer.
        index: usize,
        /// Failure reported by the worker.
        message: String,
    },

    /// Task distribution could not be set up or broke down.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

/// Result type for toolpath generation.
pub type Result<T> = std::result::Result<T, CamError>;
