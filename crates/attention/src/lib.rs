//! Exact causal self-attention primitives.
//!
//! The crate defines a portable API for computing causal self-attention over
//! tensors with layout `[batch, n_heads, seq_len, head_dim]`. The inputs `Q`,
//! `K`, and `V` share the same layout and dtype (bf16, f16, or f32).
//! Reductions are performed internally in `f32`, and the output tensor
//! matches the input dtype and shape.
//!
//! Causality is enforced through the additive masks in [`masks`]: entries of
//! `0.0` keep a score, `-inf` discards it before the softmax. Dropout is an
//! optional, train-only concern controlled via the public configuration;
//! leaving it unset keeps the computation deterministic.

pub mod core;
pub mod masks;
pub mod reference;

pub use crate::core::{Attention, AttentionConfig, AttentionError};
pub use crate::masks::build_causal_mask;
pub use crate::reference::ExactAttention;
