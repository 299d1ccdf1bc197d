//! Error types for gallery-nn.

use thiserror::Error;

/// Errors raised while building or running models.
#[derive(Debug, Error)]
pub enum Error {
    /// Preprocessing or sequencing failure.
    #[error(transparent)]
    Core(#[from] gallery_core::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// `predict` or `forward` called before `build`.
    #[error("model has not been built")]
    NotBuilt,

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Inputs do not match what the forward computation expects.
    #[error("invalid inputs: {0}")]
    InvalidInputs(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
