//! Residual connections for pre-norm decoder blocks.
//!
//! Residual branches combine tensors of shape `(batch, seq, hidden)` and
//! assume a consistent dtype. The addition is performed in
//! [`PrecisionPolicy::compute`] and the result cast back to the storage dtype.

use candle_core::{Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Adds a sub-layer branch back onto the residual stream.
///
/// `branch` and `stream` must share shape and dtype. If the branch is all
/// zeros the output equals `stream` exactly.
pub fn add(branch: &Tensor, stream: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    let expected = stream.dims();
    checks::expect_batch_seq_hidden("residual.stream", stream, expected[2])?;
    checks::expect_shape("residual.branch", branch, expected)?;
    checks::expect_same_dtype("residual.branch", branch, "residual.stream", stream)?;

    let branch = policy.cast_for_matmul(branch)?;
    let stream = policy.cast_for_matmul(stream)?;
    let added = branch.add(&stream)?;
    policy.cast_to_storage(&added)
}
