//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout `[batch, n_heads, seq_len,
//! head_dim]`. The output tensor mirrors the input layout, and reductions
//! accumulate in `f32` regardless of the incoming dtype.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::AttentionConfig;
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q`, `k`, and `v` share the layout `[batch, n_heads, seq_len, head_dim]`.
/// * The returned tensor mirrors the layout and dtype of `q`.
/// * Masks, when present, are additive and must be shaped
///   `[batch, 1 or n_heads, q_len, k_len]`.
/// * Score scaling is `1 / sqrt(head_dim)`; the softmax runs over the key
///   axis in `f32`.
/// * A shape or dtype violation aborts before any output is produced.
pub trait Attention {
    /// Compute scaled dot-product attention with an optional additive mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &AttentionConfig,
    ) -> Result<Tensor, AttentionError>;
}
