//! Pre-norm decoder block.
//!
//! Each block runs two residual branches over the hidden stream:
//!
//! ```text
//! x = x + Wo * attend(rope(norm(x) * Wq), rope(norm(x) * Wk), norm(x) * Wv)
//! x = x + mlp(norm(x))
//! ```
//!
//! Queries and keys are additionally RMS-normalised per head after the rotary
//! rotation. None of the norms carry learnable parameters and none of the
//! projections carry a bias.

use attention::{Attention, AttentionConfig, ExactAttention};
use candle_core::Tensor;
use embedding::{Rope, RopeConfig};
use layers::{
    activations::ActivationKind, residual, FeedForward, FeedForwardConfig, FeedForwardLayer,
    Linear, LinearConfig, LinearInit, LinearLayer, NormConfig, NormalizationLayer, PrecisionPolicy,
    RmsNorm,
};

use crate::config::GptConfig;
use crate::error::{ModelError, Result};

/// Externally supplied weights for a single decoder block.
///
/// All projections are bias-free. Query, key, value and output projections
/// are shaped `(hidden, hidden)`; the MLP up projection is
/// `(hidden * mlp_ratio, hidden)` and the down projection is its transpose
/// shape `(hidden, hidden * mlp_ratio)`.
#[derive(Debug, Clone)]
pub struct BlockWeights {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
    pub proj: Tensor,
    pub up: Tensor,
    pub down: Tensor,
}

/// A single pre-norm decoder block with causal self-attention and a
/// squared-ReLU MLP.
#[derive(Debug)]
pub struct TransformerBlock {
    hidden_dim: usize,
    n_heads: usize,
    head_dim: usize,
    policy: PrecisionPolicy,
    norm_attn: RmsNorm,
    norm_mlp: RmsNorm,
    qk_norm: RmsNorm,
    query: Linear,
    key: Linear,
    value: Linear,
    proj: Linear,
    mlp: FeedForward,
    attention: ExactAttention,
    attn_cfg: AttentionConfig,
    rope: Option<Rope>,
}

impl TransformerBlock {
    /// Builds a block with Xavier-initialised projections.
    pub fn new(config: &GptConfig) -> Result<Self> {
        let hidden = config.hidden_dim;
        let init = LinearInit::XavierUniform;
        let proj_cfg = LinearConfig::new(hidden, hidden);

        let query = Linear::with_init(proj_cfg.clone(), &init, &config.device, config.dtype)?;
        let key = Linear::with_init(proj_cfg.clone(), &init, &config.device, config.dtype)?;
        let value = Linear::with_init(proj_cfg.clone(), &init, &config.device, config.dtype)?;
        let proj = Linear::with_init(proj_cfg, &init, &config.device, config.dtype)?;

        let mlp = FeedForward::with_init(
            FeedForwardConfig::with_expansion_ratio(
                hidden,
                config.mlp_ratio,
                ActivationKind::ReluSquared,
            ),
            &init,
            &config.device,
            config.dtype,
        )?;

        Self::assemble(config, query, key, value, proj, mlp)
    }

    /// Builds a block around externally supplied weights, validating every
    /// shape before any tensor work happens.
    pub fn from_weights(config: &GptConfig, weights: BlockWeights) -> Result<Self> {
        let hidden = config.hidden_dim;
        let intermediate = hidden * config.mlp_ratio;

        Self::expect_weight("query", &weights.query, hidden, hidden)?;
        Self::expect_weight("key", &weights.key, hidden, hidden)?;
        Self::expect_weight("value", &weights.value, hidden, hidden)?;
        Self::expect_weight("proj", &weights.proj, hidden, hidden)?;
        Self::expect_weight("up", &weights.up, intermediate, hidden)?;
        Self::expect_weight("down", &weights.down, hidden, intermediate)?;

        let proj_cfg = LinearConfig::new(hidden, hidden);
        let query = Linear::new(proj_cfg.clone(), weights.query)?;
        let key = Linear::new(proj_cfg.clone(), weights.key)?;
        let value = Linear::new(proj_cfg.clone(), weights.value)?;
        let proj = Linear::new(proj_cfg, weights.proj)?;

        let mlp = FeedForward::new(
            FeedForwardConfig::with_expansion_ratio(
                hidden,
                config.mlp_ratio,
                ActivationKind::ReluSquared,
            ),
            weights.up,
            weights.down,
        )?;

        Self::assemble(config, query, key, value, proj, mlp)
    }

    fn assemble(
        config: &GptConfig,
        query: Linear,
        key: Linear,
        value: Linear,
        proj: Linear,
        mlp: FeedForward,
    ) -> Result<Self> {
        let head_dim = config.head_dim();
        let rope = if config.rope {
            Some(Rope::new(RopeConfig::new(head_dim))?)
        } else {
            None
        };

        Ok(Self {
            hidden_dim: config.hidden_dim,
            n_heads: config.n_heads,
            head_dim,
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
            norm_attn: RmsNorm::new(NormConfig::new(config.hidden_dim)),
            norm_mlp: RmsNorm::new(NormConfig::new(config.hidden_dim)),
            qk_norm: RmsNorm::new(NormConfig::new(head_dim)),
            query,
            key,
            value,
            proj,
            mlp,
            attention: ExactAttention::new(),
            attn_cfg: AttentionConfig::default(),
            rope,
        })
    }

    fn expect_weight(name: &str, weight: &Tensor, rows: usize, cols: usize) -> Result<()> {
        if weight.dims() != [rows, cols] {
            return Err(ModelError::Shape(format!(
                "block {name} projection expects shape [{rows}, {cols}], got {:?}",
                weight.dims()
            )));
        }
        Ok(())
    }

    /// `(B, T, H)` to `(B, heads, T, head_dim)`.
    fn expand_heads(&self, hidden: &Tensor) -> Result<Tensor> {
        let (b, t, _) = hidden.dims3()?;
        let split = hidden.reshape((b, t, self.n_heads, self.head_dim))?;
        Ok(split.permute((0, 2, 1, 3))?.contiguous()?)
    }

    /// `(B, heads, T, head_dim)` back to `(B, T, H)`.
    fn merge_heads(&self, heads: &Tensor) -> Result<Tensor> {
        let (b, _, t, _) = heads.dims4()?;
        let merged = heads.permute((0, 2, 1, 3))?.contiguous()?;
        Ok(merged.reshape((b, t, self.hidden_dim))?)
    }

    /// Runs the block on `hidden` shaped `(B, T, H)`. The mask is additive
    /// and shaped `[B, heads, T, T]` (see [`attention::build_causal_mask`]).
    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let normed = self.norm_attn.forward(hidden, &self.policy)?;

        let q = self.query.forward(&normed, &self.policy)?;
        let k = self.key.forward(&normed, &self.policy)?;
        let v = self.value.forward(&normed, &self.policy)?;

        let q = self.expand_heads(&q)?;
        let k = self.expand_heads(&k)?;
        let v = self.expand_heads(&v)?;

        let (q, k) = match &self.rope {
            Some(rope) => rope.apply(&q, &k, 0)?,
            None => (q, k),
        };

        let q = self.qk_norm.forward(&q, &self.policy)?;
        let k = self.qk_norm.forward(&k, &self.policy)?;

        let attended = self
            .attention
            .attend(&q, &k, &v, mask, &self.attn_cfg)
            .map_err(|err| ModelError::Shape(err.to_string()))?;

        let merged = self.merge_heads(&attended)?;
        let projected = self.proj.forward(&merged, &self.policy)?;
        let hidden = residual::add(&projected, hidden, &self.policy)?;

        let normed = self.norm_mlp.forward(&hidden, &self.policy)?;
        let expanded = self.mlp.forward(&normed, &self.policy)?;
        residual::add(&expanded, &hidden, &self.policy).map_err(ModelError::from)
    }
}
