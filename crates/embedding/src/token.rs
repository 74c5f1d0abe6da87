//! Token embedding layer and tied readout head.
//!
//! The embedding table doubles as the output projection: `linear_out`
//! multiplies by the transpose of the same storage, so mutating the table is
//! observable through both the lookup and the logits.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};
use layers::PrecisionPolicy;

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }

    fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if self.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        Ok(())
    }
}

/// Learnable token embedding table with a tied projection head.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
    policy: PrecisionPolicy,
}

impl TokenEmbedding {
    /// Builds a new token embedding table with `N(0, 1)` initialisation.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Var::randn(0f32, 1f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Var::from_tensor(&cast)?
        };
        Self::from_var(config, weight)
    }

    /// Builds the table from an externally supplied weight tensor shaped
    /// `(vocab_size, hidden_dim)`. Shape mismatches fail before any forward
    /// pass is possible.
    pub fn from_weight(config: TokenEmbeddingConfig, weight: Tensor) -> Result<Self> {
        config.validate()?;
        let expected = [config.vocab_size, config.hidden_dim];
        if weight.dims() != expected {
            bail!(
                "embedding weight expected shape {:?}, got {:?}",
                expected,
                weight.dims()
            );
        }
        let weight = Var::from_tensor(&weight.to_dtype(config.dtype)?)?;
        Self::from_var(config, weight)
    }

    fn from_var(config: TokenEmbeddingConfig, weight: Var) -> Result<Self> {
        let policy = config.policy();
        Ok(Self {
            config,
            weight,
            policy,
        })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Overwrites the shared table. Both the lookup and the tied readout see
    /// the new values.
    pub fn copy_weight_from(&self, value: &Tensor) -> Result<()> {
        let expected = [self.config.vocab_size, self.config.hidden_dim];
        if value.dims() != expected {
            bail!(
                "embedding weight expected shape {:?}, got {:?}",
                expected,
                value.dims()
            );
        }
        self.weight.set(&value.to_dtype(self.config.dtype)?)
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs
    /// follow the `(batch, seq, hidden)` layout using the configured storage
    /// dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let dims = token_ids.dims();

        let ids = token_ids.to_dtype(DType::I64)?;
        let flat = ids.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let weight = self.weight.as_tensor();
        let gathered = weight.index_select(&flat, 0)?;
        let mut output_dims = dims.to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    /// Returns the trainable parameters with an optional scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() {
            "embedding".to_string()
        } else {
            scope.to_string()
        };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }

    /// Applies the tied linear projection using the transpose of the
    /// embedding weight, mapping `(batch, seq, hidden)` to logits
    /// `(batch, seq, vocab_size)`.
    pub fn linear_out(&self, hidden: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden_dim) = match hidden.dims() {
            [batch, seq, hidden_dim] => (*batch, *seq, *hidden_dim),
            dims => {
                return Err(Error::Msg(format!(
                    "linear_out expects input shaped [batch, seq, hidden], got {dims:?}"
                )))
            }
        };
        if hidden_dim != self.config.hidden_dim {
            return Err(Error::Msg(format!(
                "linear_out expected hidden dim {} but received {hidden_dim}",
                self.config.hidden_dim
            )));
        }

        let policy = &self.policy;
        let input = policy.cast_for_matmul(hidden)?;
        let weight = policy.cast_for_matmul(self.weight.as_tensor())?;
        let weight_t = weight.t()?;

        let flat = input.reshape((batch * seq, hidden_dim))?;
        let logits = flat.matmul(&weight_t)?;
        let logits = logits.reshape((batch, seq, self.config.vocab_size))?;
        policy.cast_to_storage(&logits)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] if *batch > 0 && *seq > 0 => {}
            dims => {
                return Err(Error::Msg(format!(
                    "token_ids must be shaped [batch, seq] with non-zero dims, got {dims:?}"
                )))
            }
        }
        if !token_ids.dtype().is_int() {
            return Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )));
        }
        Ok(())
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        if flat_ids.elem_count() == 0 {
            return Ok(());
        }
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id} (minimum)"
            )));
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}
