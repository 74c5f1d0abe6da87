//! Reference attention kernels.

pub mod exact;

pub use exact::ExactAttention;
