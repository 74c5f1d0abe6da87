//! Dense projection layers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` and return
//! tensors with `(batch, seq, out_dim)`; rank-2 `(rows, in_dim)` inputs are
//! also accepted. Projections in this architecture never carry a bias term.
//! Weights and activations are cast to [`PrecisionPolicy::compute`] for the
//! matmul and the output is cast back to the storage dtype. Weight storage is
//! shared behind an `Arc` so tied layers observe mutation through either
//! handle.

use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single projection layer.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
        }
    }
}

/// Shared interface for dense projections.
pub trait LinearLayer: Send + Sync {
    /// Returns the static configuration used to validate inputs.
    fn config(&self) -> &LinearConfig;

    /// Applies the projection, promoting to the compute dtype when needed.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Supported weight initialisation policies for transformer projections.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Scales another policy to support deep network stabilisation.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl LinearInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::Scaled { base, scale } => {
                let sampled = base.sample(shape, device, DType::F32)?;
                sampled.affine(*scale, 0.0)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight_f32)
        } else {
            weight_f32.to_dtype(dtype)
        }
    }
}

/// Bias-free dense projection with a mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Arc<Mutex<Tensor>>,
}

impl Linear {
    /// Constructs a linear layer from a pre-existing weight tensor shaped
    /// `(output_dim, input_dim)`.
    pub fn new(config: LinearConfig, weight: Tensor) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Ok(Self {
            config,
            weight: Arc::new(Mutex::new(weight)),
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        Self::new(config, weight)
    }

    /// Creates a new `Linear` that shares weight storage with `source`.
    pub fn tied(config: LinearConfig, source: &Linear) -> Result<Self> {
        if config.input_dim != source.config.input_dim
            || config.output_dim != source.config.output_dim
        {
            return Err(Error::Msg(
                "tied linear requires matching input/output dimensions".into(),
            ));
        }
        Ok(Self {
            config,
            weight: source.weight.clone(),
        })
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.lock().unwrap().clone()
    }

    /// Copies `value` into the shared weight storage, visible to tied layers.
    pub fn copy_weight_from(&self, value: &Tensor) -> Result<()> {
        Self::validate_weight(&self.config, value)?;
        let mut weight = self.weight.lock().unwrap();
        let cast = value.to_dtype(weight.dtype())?;
        *weight = cast;
        Ok(())
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", weight)?;
        Ok(())
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [_, _, _] => checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim),
            [_, last] if *last == self.config.input_dim => Ok(()),
            dims => Err(Error::Msg(format!(
                "linear expects input shaped [B, T, {0}] or [rows, {0}], got {dims:?}",
                self.config.input_dim
            ))),
        }
    }
}

impl LinearLayer for Linear {
    fn config(&self) -> &LinearConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight = {
            let guard = self.weight.lock().unwrap();
            policy.cast_for_matmul(&guard)?
        };
        let weight_t = weight.t()?;

        let output = match input.dims() {
            [batch, seq, _] => {
                let flat = input.reshape((*batch * *seq, self.config.input_dim))?;
                let proj = flat.matmul(&weight_t)?;
                proj.reshape((*batch, *seq, self.config.output_dim))?
            }
            [rows, _] => input
                .matmul(&weight_t)?
                .reshape((*rows, self.config.output_dim))?,
            _ => unreachable!("validated above"),
        };

        policy.cast_to_storage(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtypes::PrecisionPolicy;
    use candle_core::{DType, Device};

    fn reference_linear(input: &Tensor, weight: &Tensor) -> Result<Tensor> {
        let weight_t = weight.t()?;
        match input.dims() {
            [batch, seq, hidden] => {
                let flat = input.reshape((*batch * *seq, *hidden))?;
                flat.matmul(&weight_t)?
                    .reshape((*batch, *seq, weight.dims()[0]))
            }
            _ => input.matmul(&weight_t),
        }
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 4);
        let weight = Tensor::randn(0f32, 0.05, (config.output_dim, config.input_dim), &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(config.clone(), weight.to_dtype(dtype)?)?;
            let input =
                Tensor::randn(0f32, 1.0, (2, 5, config.input_dim), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, config.output_dim]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight)?;
            let diff = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(diff <= tol, "max diff {diff} for {dtype:?}");
        }
        Ok(())
    }

    #[test]
    fn wrong_last_dimension_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 4);
        let linear = Linear::with_init(config, &LinearInit::XavierUniform, &device, DType::F32)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let input = Tensor::zeros((1, 3, 6), DType::F32, &device)?;
        assert!(linear.forward(&input, &policy).is_err());
        Ok(())
    }

    #[test]
    fn weight_shape_is_validated_at_construction() {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 4);
        let wrong = Tensor::zeros((4, 6), DType::F32, &device).unwrap();
        assert!(Linear::new(config, wrong).is_err());
    }

    #[test]
    fn weight_tying_reflects_updates() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(16, 16);
        let base = Linear::with_init(
            config.clone(),
            &LinearInit::XavierUniform,
            &device,
            DType::F32,
        )?;
        let tied = Linear::tied(config.clone(), &base)?;

        let new_weight = Tensor::full(0.25f32, (config.output_dim, config.input_dim), &device)?;
        base.copy_weight_from(&new_weight)?;

        let input = Tensor::randn(0f32, 1.0, (1, 3, config.input_dim), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let out_base = base.forward(&input, &policy)?;
        let out_tied = tied.forward(&input, &policy)?;
        let diff = out_base
            .sub(&out_tied)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff <= 1e-6);
        Ok(())
    }

    #[test]
    fn scaled_init_shrinks_weight_magnitude() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(64, 64);
        let init = LinearInit::scaled(LinearInit::XavierNormal, 0.5);
        let linear = Linear::with_init(config, &init, &device, DType::F32)?;
        let values = linear.weight().flatten_all()?.to_vec1::<f32>()?;
        let std = {
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
                / values.len() as f32;
            var.sqrt() as f64
        };
        let expected = 0.5 * (2.0f64 / 128.0).sqrt();
        assert!((std - expected).abs() < expected * 0.3);
        Ok(())
    }
}
