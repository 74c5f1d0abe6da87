//! Building blocks for transformer layers.
//!
//! Feed-forward, normalisation, and residual components assembled from Candle
//! primitives. Everything operates on real-valued tensors whose last axis is
//! the channel dimension; rank-3 `(batch, seq, hidden)` is the common layout.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit, LinearLayer};
pub use mlp::{FeedForward, FeedForwardConfig, FeedForwardLayer};
pub use norm::{NormConfig, NormalizationLayer, RmsNorm};
