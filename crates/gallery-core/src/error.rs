//! Error types for gallery-core.

use thiserror::Error;

/// Errors raised while preprocessing graphs or producing batches.
#[derive(Error, Debug)]
pub enum Error {
    /// Transform name not present in the registry.
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// Attribute normalization kind not recognized.
    #[error("Unsupported normalization: {0}")]
    UnsupportedNormalization(String),

    /// Batch index beyond the sequence length.
    #[error("Batch index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Sampling rank exceeds the available candidate columns.
    #[error("Cannot sample {rank} columns from {available} candidates")]
    InvalidSampleSize { rank: usize, available: usize },

    /// Leading dimensions (or list lengths) disagree.
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    /// Node index outside `[0, n_nodes)`.
    #[error("Node index {index} out of range for graph with {n_nodes} nodes")]
    NodeOutOfRange { index: usize, n_nodes: usize },

    /// Device hint that cannot be parsed.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Invalid configuration value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Weighted sampling rejected the distribution.
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// Candle tensor error.
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(context: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            expected,
            got,
        }
    }
}

/// Result type alias for gallery-core.
pub type Result<T> = std::result::Result<T, Error>;
