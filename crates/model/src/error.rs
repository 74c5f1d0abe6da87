//! Error types for model construction and evaluation.

use thiserror::Error;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors surfaced by the model crate.
///
/// Configuration and shape violations are unrecoverable at the point of
/// occurrence: no partial output is produced and the caller decides what to
/// surface.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid hyperparameter combination, detected at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tensor shape does not match the module-boundary contract, including
    /// sequence lengths exceeding the configured maximum.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A tensor-library failure propagated from Candle.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
