//! Decoder-only transformer assembly.
//!
//! The model is a forward-only data-flow graph: token embedding, a stack of
//! pre-norm decoder blocks, a final parameter-free RMS norm, and a logits
//! projection tied to the embedding table. Forward calls take `&self` and
//! weights are read-only during evaluation, so independent forward passes may
//! run concurrently over a shared model.

pub mod block;
pub mod config;
pub mod error;
pub mod model;

pub use block::{BlockWeights, TransformerBlock};
pub use config::GptConfig;
pub use error::ModelError;
pub use model::Model;
