//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape {
        /// Human-readable description of the violated expectation.
        context: String,
    },

    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType {
        /// Textual rendering of the offending dtype.
        requested: String,
    },

    /// A backend-specific failure propagated to the caller.
    #[error("{message}")]
    Backend {
        /// Message produced by the underlying tensor library.
        message: String,
    },
}

impl AttentionError {
    pub(crate) fn backend(error: candle_core::Error) -> Self {
        Self::Backend {
            message: error.to_string(),
        }
    }
}
