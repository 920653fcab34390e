//! Error types for pvscull

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Parallel input arrays disagree in length.
    #[error("length mismatch: {ids} ids but {positions} positions")]
    LengthMismatch { ids: usize, positions: usize },

    /// A classification job is already running.
    #[error("a classification job is already in progress")]
    JobInProgress,

    /// Neither a leaf snapshot nor a built index exists yet.
    #[error("no visibility data has been published")]
    NoVisibilityData,

    /// Allocation failure while building an index.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}
