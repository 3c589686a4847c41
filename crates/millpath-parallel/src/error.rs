//! Error types for task distribution.

use thiserror::Error;

/// Errors raised while setting up or talking to a worker pool.
///
/// Failures of individual tasks are not errors of this type; they travel
/// as [`TaskFailure`](crate::TaskFailure) values attached to the task.
#[derive(Error, Debug)]
pub enum ParallelError {
    /// The manager could not be reached.
    #[error("cannot connect to manager at {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The manager refused the shared secret.
    #[error("manager rejected authentication: {0}")]
    AuthRejected(String),

    /// An operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The peer sent something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker or the manager connection has shut down, or the
    /// connection lost track of its replies.
    #[error("manager is no longer running")]
    ManagerGone,

    /// Invalid parallel configuration.
    #[error("invalid parallel configuration: {0}")]
    InvalidConfig(String),

    /// The local thread pool could not be created.
    #[error("failed to start worker pool: {0}")]
    PoolBuild(String),

    /// JSON encoding or decoding failed.
    #[error("serialization failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// Socket or runtime I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for task distribution.
pub type Result<T> = std::result::Result<T, ParallelError>;
