//! Architecture hyperparameters.

use candle_core::{DType, Device};

use crate::error::{ModelError, Result};

/// Immutable record of the decoder architecture.
///
/// Constructed once at model build time and read-only thereafter. The default
/// values describe the 321M-parameter configuration: hidden 1024, 24 layers,
/// 8 heads (head_dim 128), 3x MLP expansion, 64K vocabulary, 2048 context.
#[derive(Debug, Clone)]
pub struct GptConfig {
    /// Width of the residual stream (H).
    pub hidden_dim: usize,
    /// Number of stacked decoder blocks (L).
    pub n_layers: usize,
    /// Number of attention heads; must divide `hidden_dim` evenly.
    pub n_heads: usize,
    /// MLP expansion ratio (intermediate width = H * ratio).
    pub mlp_ratio: usize,
    /// Vocabulary size (V); token ids live in `[0, V)`.
    pub vocab_size: usize,
    /// Maximum sequence length (S) a forward pass may present.
    pub sequence_len: usize,
    /// Whether rotary positional encoding is applied to queries and keys.
    pub rope: bool,
    /// Storage dtype for parameters and activations.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl Default for GptConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 1024,
            n_layers: 24,
            n_heads: 8,
            mlp_ratio: 3,
            vocab_size: 64 * 1024,
            sequence_len: 2048,
            rope: true,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }
}

impl GptConfig {
    /// Per-head channel count, `hidden_dim / n_heads`. Only meaningful after
    /// [`validate`](Self::validate) has accepted the configuration.
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads
    }

    /// Validates structural invariants. Divisibility is checked explicitly;
    /// the head dimension is never silently truncated.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(ModelError::Configuration(
                "hidden_dim must be greater than zero".into(),
            ));
        }
        if self.n_layers == 0 {
            return Err(ModelError::Configuration(
                "n_layers must be greater than zero".into(),
            ));
        }
        if self.n_heads == 0 {
            return Err(ModelError::Configuration(
                "n_heads must be greater than zero".into(),
            ));
        }
        if self.hidden_dim % self.n_heads != 0 {
            return Err(ModelError::Configuration(format!(
                "hidden_dim ({}) must be divisible by n_heads ({})",
                self.hidden_dim, self.n_heads
            )));
        }
        if self.mlp_ratio == 0 {
            return Err(ModelError::Configuration(
                "mlp_ratio must be greater than zero".into(),
            ));
        }
        if self.vocab_size == 0 {
            return Err(ModelError::Configuration(
                "vocab_size must be greater than zero".into(),
            ));
        }
        if self.sequence_len == 0 {
            return Err(ModelError::Configuration(
                "sequence_len must be greater than zero".into(),
            ));
        }
        if self.rope && self.head_dim() % 2 != 0 {
            return Err(ModelError::Configuration(format!(
                "rotary embeddings require an even head_dim, got {}",
                self.head_dim()
            )));
        }
        Ok(())
    }
}
