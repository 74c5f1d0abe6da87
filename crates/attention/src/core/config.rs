//! Configuration options shared by all attention implementations.

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self { dropout_p: None }
    }
}
