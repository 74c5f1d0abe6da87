//! Activation catalogue for transformer feed-forward stacks.
//!
//! Activations consume tensors shaped `(batch, seq, hidden)` and return
//! tensors with identical layout. Each implementation promotes inputs to the
//! compute dtype requested by [`PrecisionPolicy`] before evaluating the
//! non-linearity, then casts the result back to the storage dtype so callers
//! can chain additional mixed-precision aware operations.
//!
//! The squared ReLU variant computes `max(x, 0)^2`. It is the activation the
//! decoder MLP uses and is exactly zero for non-positive inputs.

use std::sync::Arc;

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity is implemented by an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// Identity function, useful for debugging or wiring custom stacks.
    Identity,
    /// Standard ReLU, zeroing out negative values.
    Relu,
    /// Squared ReLU: `max(x, 0)^2`.
    ReluSquared,
}

/// Common interface shared by transformer-friendly activation functions.
pub trait Activation: Send + Sync + std::fmt::Debug {
    /// Returns the [`ActivationKind`] for introspection when wiring composite blocks.
    fn kind(&self) -> ActivationKind;

    /// Applies the activation to `input` using the precision rules in `policy`.
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

#[derive(Debug)]
struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match self.kind {
            ActivationKind::Identity => policy.cast_to_storage(input),
            ActivationKind::Relu => {
                let compute = policy.cast_for_matmul(input)?;
                policy.cast_to_storage(&compute.relu()?)
            }
            ActivationKind::ReluSquared => {
                let compute = policy.cast_for_matmul(input)?;
                policy.cast_to_storage(&compute.relu()?.sqr()?)
            }
        }
    }
}

/// Returns a shared built-in activation implementation.
pub fn builtin(kind: ActivationKind) -> Arc<dyn Activation> {
    Arc::new(BuiltinActivation { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn relu_squared_matches_pinned_values() -> Result<()> {
        let device = Device::Cpu;
        let activation = builtin(ActivationKind::ReluSquared);
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let input = Tensor::from_slice(&[-2.0f32, -0.5, 0.0, 0.5, 2.0], (5,), &device)?;

        let output = activation.forward(&input, &policy)?;
        let values = output.to_vec1::<f32>()?;
        assert_eq!(values, vec![0.0, 0.0, 0.0, 0.25, 4.0]);
        Ok(())
    }

    #[test]
    fn relu_squared_is_exactly_zero_on_zero_input() -> Result<()> {
        let device = Device::Cpu;
        let activation = builtin(ActivationKind::ReluSquared);
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let input = Tensor::zeros((1, 2, 4), DType::F32, &device)?;

        let output = activation.forward(&input, &policy)?;
        let values = output.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn identity_passes_through() -> Result<()> {
        let device = Device::Cpu;
        let activation = builtin(ActivationKind::Identity);
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let input = Tensor::from_slice(&[-1.5f32, 0.0, 2.5], (3,), &device)?;

        let output = activation.forward(&input, &policy)?;
        assert_eq!(output.to_vec1::<f32>()?, vec![-1.5, 0.0, 2.5]);
        Ok(())
    }
}
