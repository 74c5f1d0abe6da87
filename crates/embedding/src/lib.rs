//! Embedding crate.
//!
//! `token` hosts the vocabulary embedding table with its tied readout head;
//! `positional` exposes the rotary positional embedding helpers.

pub mod positional;
pub mod token;

pub use positional::rope::{Rope, RopeConfig};
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
