//! Full decoder stack: embedding, blocks, final norm, tied readout.

use attention::build_causal_mask;
use candle_core::Tensor;
use embedding::{TokenEmbedding, TokenEmbeddingConfig};
use layers::{NormConfig, NormalizationLayer, PrecisionPolicy, RmsNorm};

use crate::block::{BlockWeights, TransformerBlock};
use crate::config::GptConfig;
use crate::error::{ModelError, Result};

/// Decoder-only causal language model.
///
/// `forward` maps token ids shaped `(B, T)` to logits shaped `(B, T, V)`.
/// The output projection shares storage with the embedding table, so the
/// model carries no separate readout weight.
#[derive(Debug)]
pub struct Model {
    config: GptConfig,
    embedding: TokenEmbedding,
    blocks: Vec<TransformerBlock>,
    final_norm: RmsNorm,
    policy: PrecisionPolicy,
}

impl Model {
    /// Builds a model with randomly initialised parameters.
    pub fn new(config: GptConfig) -> Result<Self> {
        config.validate()?;

        let embedding = TokenEmbedding::new(Self::embedding_config(&config))?;
        let mut blocks = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            blocks.push(TransformerBlock::new(&config)?);
        }

        Ok(Self {
            embedding,
            blocks,
            final_norm: RmsNorm::new(NormConfig::new(config.hidden_dim)),
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
            config,
        })
    }

    /// Builds a model around externally supplied weights.
    ///
    /// `embedding_weight` must be shaped `(vocab_size, hidden_dim)` and
    /// `block_weights` must contain exactly `n_layers` entries.
    pub fn from_weights(
        config: GptConfig,
        embedding_weight: Tensor,
        block_weights: Vec<BlockWeights>,
    ) -> Result<Self> {
        config.validate()?;
        if block_weights.len() != config.n_layers {
            return Err(ModelError::Shape(format!(
                "expected {} block weight sets, got {}",
                config.n_layers,
                block_weights.len()
            )));
        }

        let embedding =
            TokenEmbedding::from_weight(Self::embedding_config(&config), embedding_weight)?;
        let mut blocks = Vec::with_capacity(config.n_layers);
        for weights in block_weights {
            blocks.push(TransformerBlock::from_weights(&config, weights)?);
        }

        Ok(Self {
            embedding,
            blocks,
            final_norm: RmsNorm::new(NormConfig::new(config.hidden_dim)),
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
            config,
        })
    }

    fn embedding_config(config: &GptConfig) -> TokenEmbeddingConfig {
        TokenEmbeddingConfig {
            vocab_size: config.vocab_size,
            hidden_dim: config.hidden_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        }
    }

    /// Returns the architecture configuration.
    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    /// Returns the embedding layer, whose storage also backs the readout.
    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    /// Runs the full stack over `token_ids` shaped `(B, T)` and returns
    /// logits shaped `(B, T, vocab_size)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let dims = token_ids.dims();
        let (batch, seq_len) = match dims {
            [b, t] => (*b, *t),
            _ => {
                return Err(ModelError::Shape(format!(
                    "token ids must be shaped [batch, seq], got {dims:?}"
                )))
            }
        };
        if seq_len == 0 {
            return Err(ModelError::Shape("sequence length must be nonzero".into()));
        }
        if seq_len > self.config.sequence_len {
            return Err(ModelError::Shape(format!(
                "sequence length {seq_len} exceeds the configured maximum {}",
                self.config.sequence_len
            )));
        }

        log::debug!("model::forward batch={batch} seq_len={seq_len}");

        let mut hidden = self.embedding.forward(token_ids)?;
        let mask = build_causal_mask(
            &self.config.device,
            batch,
            self.config.n_heads,
            seq_len,
            seq_len,
        )?;

        for block in &self.blocks {
            hidden = block.forward(&hidden, Some(&mask))?;
        }

        let hidden = self.final_norm.forward(&hidden, &self.policy)?;
        Ok(self.embedding.linear_out(&hidden)?)
    }
}
