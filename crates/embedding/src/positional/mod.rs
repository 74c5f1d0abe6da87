//! Positional encoding strategies.

pub mod rope;
