//! Position-wise feed-forward blocks built on top of projections and
//! activations.
//!
//! MLPs operate on hidden states shaped `(batch, seq, hidden)` and return the
//! same layout. The first projection expands the hidden dimension to
//! `config.intermediate_size`, the squared-ReLU activation is applied
//! elementwise, and the second projection contracts back to the model hidden
//! size. Neither projection carries a bias, and no information moves across
//! the sequence axis.

use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};

use crate::{
    activations::{builtin, Activation, ActivationKind},
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit, LinearLayer},
};

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
}

impl FeedForwardConfig {
    /// Creates a standard two-projection MLP configuration.
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
        }
    }

    /// Derives the intermediate width from an integer expansion ratio.
    pub fn with_expansion_ratio(
        hidden_size: usize,
        ratio: usize,
        activation: ActivationKind,
    ) -> Self {
        Self::new(hidden_size, hidden_size * ratio, activation)
    }
}

/// Shared interface for feed-forward stacks.
pub trait FeedForwardLayer: Send + Sync {
    /// Configuration metadata used during block assembly.
    fn config(&self) -> &FeedForwardConfig;

    /// Performs the forward pass through the MLP.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Expand -> activate -> contract feed-forward network.
#[derive(Debug)]
pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
    activation: Arc<dyn Activation>,
}

impl FeedForward {
    /// Constructs the MLP from pre-existing up/down projection weights, shaped
    /// `(intermediate, hidden)` and `(hidden, intermediate)` respectively.
    pub fn new(config: FeedForwardConfig, up_weight: Tensor, down_weight: Tensor) -> Result<Self> {
        let up = Linear::new(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            up_weight,
        )?;
        let down = Linear::new(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            down_weight,
        )?;
        let activation = builtin(config.activation);
        Ok(Self {
            config,
            up,
            down,
            activation,
        })
    }

    /// Builds the MLP with randomly initialised projections.
    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
            dtype,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
            dtype,
        )?;
        let activation = builtin(config.activation);
        Ok(Self {
            config,
            up,
            down,
            activation,
        })
    }
}

impl FeedForwardLayer for FeedForward {
    fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let expanded = self.up.forward(hidden, policy)?;
        let activated = self.activation.forward(&expanded, policy)?;
        self.down.forward(&activated, policy)
    }
}
