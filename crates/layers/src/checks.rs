//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Ensures a tensor has the given rank.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(name: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    let dims = tensor.dims();
    match dims {
        [batch, seq, actual] if *actual == hidden => {
            if *batch == 0 || *seq == 0 {
                Err(Error::Msg(format!(
                    "{name}: batch/seq dimensions must be non-zero, got {dims:?}"
                )))
            } else {
                Ok(())
            }
        }
        _ => Err(Error::Msg(format!(
            "{name}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Validates that the last axis has the given channel count, for any rank >= 2.
pub fn expect_last_dim(name: &str, tensor: &Tensor, channels: usize) -> Result<()> {
    let dims = tensor.dims();
    match dims.last() {
        Some(actual) if dims.len() >= 2 && *actual == channels => Ok(()),
        _ => Err(Error::Msg(format!(
            "{name}: expected (..., {channels}) layout with rank >= 2, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(
    left_name: &str,
    left: &Tensor,
    right_name: &str,
    right: &Tensor,
) -> Result<()> {
    if left.dtype() == right.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{left_name} dtype {:?} does not match {right_name} dtype {:?}",
            left.dtype(),
            right.dtype()
        )))
    }
}

/// Checks a parameter tensor is contiguous in memory.
pub fn expect_contiguous(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{name}: tensor must be contiguous")))
    }
}
