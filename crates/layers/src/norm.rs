//! Parameter-free root-mean-square normalisation.
//!
//! Inputs follow the `(..., channels)` convention: rank-3 `(batch, seq,
//! hidden)` on the residual stream and rank-4 `(batch, heads, seq, head_dim)`
//! when normalising per-head query/key vectors. Normalisation happens along
//! the last axis while preserving the original layout. Statistics are promoted
//! to [`PrecisionPolicy::reduction`] before the output is cast back to the
//! storage dtype.
//!
//! There are no learned scale or shift parameters; every vector is rescaled
//! to unit RMS magnitude, `x / sqrt(mean(x^2) + eps)`.

use candle_core::{Result, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by normalisation layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormConfig {
    /// Size of the channel dimension being normalised.
    pub channels: usize,
    /// Numeric stabiliser added inside the RMS denominator.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration using the default epsilon.
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            epsilon: 1e-5,
        }
    }
}

/// Shared interface for normalisation layers used inside decoder blocks.
pub trait NormalizationLayer: Send + Sync {
    /// Returns the configuration so callers can check shape compatibility.
    fn config(&self) -> &NormConfig;

    /// Applies the normalisation to a hidden state tensor.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Root mean square norm without affine parameters.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    config: NormConfig,
}

impl RmsNorm {
    /// Constructs the norm for a given channel count.
    pub fn new(config: NormConfig) -> Self {
        Self { config }
    }
}

impl NormalizationLayer for RmsNorm {
    fn config(&self) -> &NormConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_last_dim("norm.input", hidden, self.config.channels)?;

        let channels = self.config.channels as f64;
        let compute = policy.cast_for_reduction(hidden)?;
        let mean_square = (compute.sqr()?.sum_keepdim(D::Minus1)? / channels)?;
        let denom = (mean_square + self.config.epsilon)?.sqrt()?;
        let normalized = compute.broadcast_div(&denom)?;

        policy.cast_to_storage(&normalized)
    }
}
