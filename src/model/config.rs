use serde::{Deserialize, Serialize};

use crate::error::{GptError, Result};

/// Nonlinearity used between the two feed-forward projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// GELU with the exact erf formulation
    #[default]
    Gelu,
    /// GELU with the tanh approximation
    GeluTanh,
    /// Rectified linear unit
    Relu,
}

/// Where layer normalization sits relative to each residual connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormPlacement {
    /// `x + Dropout(Sublayer(LayerNorm(x)))`, with a final LayerNorm after the stack
    #[default]
    Pre,
    /// `LayerNorm(x + Dropout(Sublayer(x)))`, no final LayerNorm
    Post,
}

/// Model hyperparameters.
///
/// Only `vocab_size` is required when deserializing; every other field falls
/// back to the GPT-1 sized defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptConfig {
    /// Number of distinct token ids
    pub vocab_size: usize,
    /// Number of decoder blocks in the stack
    #[serde(default = "defaults::num_layers_per_stack")]
    pub num_layers_per_stack: usize,
    /// Width of the residual stream
    #[serde(default = "defaults::dim_model")]
    pub dim_model: usize,
    /// Hidden width of the feed-forward sublayer
    #[serde(default = "defaults::dim_ffn")]
    pub dim_ffn: usize,
    /// Number of attention heads
    #[serde(default = "defaults::num_heads")]
    pub num_heads: usize,
    /// Maximum context length
    #[serde(default = "defaults::block_size")]
    pub block_size: usize,
    /// Dropout rate used wherever no override is given
    #[serde(default = "defaults::dropout")]
    pub dropout: f32,
    /// Dropout on attention weights (defaults to `dropout`)
    #[serde(default)]
    pub attention_dropout: Option<f32>,
    /// Dropout on sublayer outputs (defaults to `dropout`)
    #[serde(default)]
    pub residual_dropout: Option<f32>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub norm_placement: NormPlacement,
    #[serde(default = "defaults::layer_norm_eps")]
    pub layer_norm_eps: f64,
    /// Standard deviation of the Gaussian used for weight initialization
    #[serde(default = "defaults::init_std")]
    pub init_std: f64,
}

mod defaults {
    pub fn num_layers_per_stack() -> usize {
        12
    }
    pub fn dim_model() -> usize {
        768
    }
    pub fn dim_ffn() -> usize {
        3072
    }
    pub fn num_heads() -> usize {
        12
    }
    pub fn block_size() -> usize {
        512
    }
    pub fn dropout() -> f32 {
        0.1
    }
    pub fn layer_norm_eps() -> f64 {
        1e-5
    }
    pub fn init_std() -> f64 {
        0.02
    }
}

impl GptConfig {
    /// GPT-1 sized configuration for the given vocabulary.
    #[must_use]
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            num_layers_per_stack: defaults::num_layers_per_stack(),
            dim_model: defaults::dim_model(),
            dim_ffn: defaults::dim_ffn(),
            num_heads: defaults::num_heads(),
            block_size: defaults::block_size(),
            dropout: defaults::dropout(),
            attention_dropout: None,
            residual_dropout: None,
            activation: Activation::default(),
            norm_placement: NormPlacement::default(),
            layer_norm_eps: defaults::layer_norm_eps(),
            init_std: defaults::init_std(),
        }
    }

    /// Two-layer, 32-wide configuration for experiments and tests.
    #[must_use]
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            num_layers_per_stack: 2,
            dim_model: 32,
            dim_ffn: 128,
            num_heads: 4,
            block_size: 8,
            ..Self::new(vocab_size)
        }
    }

    /// Dimension per attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.dim_model / self.num_heads
    }

    #[must_use]
    pub fn attention_dropout(&self) -> f32 {
        self.attention_dropout.unwrap_or(self.dropout)
    }

    #[must_use]
    pub fn residual_dropout(&self) -> f32 {
        self.residual_dropout.unwrap_or(self.dropout)
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Returns [`GptError::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("num_layers_per_stack", self.num_layers_per_stack),
            ("dim_model", self.dim_model),
            ("dim_ffn", self.dim_ffn),
            ("num_heads", self.num_heads),
            ("block_size", self.block_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(GptError::config(format!("{name} must be positive")));
            }
        }
        if !self.dim_model.is_multiple_of(self.num_heads) {
            return Err(GptError::config(format!(
                "dim_model {} must be divisible by num_heads {}",
                self.dim_model, self.num_heads
            )));
        }
        let rates = [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout()),
            ("residual_dropout", self.residual_dropout()),
        ];
        for (name, p) in rates {
            if !(0.0..1.0).contains(&p) {
                return Err(GptError::config(format!("{name} {p} must lie in [0, 1)")));
            }
        }
        if !(self.layer_norm_eps > 0.0) {
            return Err(GptError::config("layer_norm_eps must be positive"));
        }
        if !(self.init_std > 0.0) {
            return Err(GptError::config("init_std must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_gpt1() {
        let config = GptConfig::new(40_000);
        assert_eq!(config.num_layers_per_stack, 12);
        assert_eq!(config.dim_model, 768);
        assert_eq!(config.dim_ffn, 3072);
        assert_eq!(config.num_heads, 12);
        assert_eq!(config.block_size, 512);
        assert!((config.dropout - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.head_dim(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        let config = GptConfig {
            dim_model: 100,
            num_heads: 7,
            ..GptConfig::new(10)
        };
        assert!(matches!(
            config.validate(),
            Err(GptError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        for config in [
            GptConfig::new(0),
            GptConfig {
                num_layers_per_stack: 0,
                ..GptConfig::tiny(10)
            },
            GptConfig {
                block_size: 0,
                ..GptConfig::tiny(10)
            },
            GptConfig {
                num_heads: 0,
                ..GptConfig::tiny(10)
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(GptError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_dropout_range() {
        let mut config = GptConfig::tiny(10);
        config.dropout = 1.0;
        assert!(config.validate().is_err());
        config.dropout = 0.0;
        assert!(config.validate().is_ok());
        config.attention_dropout = Some(-0.1);
        assert!(config.validate().is_err());
        config.attention_dropout = Some(f32::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_only_needs_vocab_size() {
        let config: GptConfig = serde_json::from_str(r#"{"vocab_size": 50}"#).unwrap();
        assert_eq!(config, GptConfig::new(50));

        let config: GptConfig = serde_json::from_str(
            r#"{"vocab_size": 50, "dim_model": 32, "num_heads": 4,
                "norm_placement": "post", "activation": "gelu_tanh"}"#,
        )
        .unwrap();
        assert_eq!(config.norm_placement, NormPlacement::Post);
        assert_eq!(config.activation, Activation::GeluTanh);
        assert_eq!(config.head_dim(), 8);
    }
}
