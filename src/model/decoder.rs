//! Stack of decoder blocks.

use candle_core::Tensor;
use candle_nn::{LayerNorm, Module, VarBuilder};

use super::config::{GptConfig, NormPlacement};
use super::init;
use super::layers::DecoderBlock;
use crate::error::{GptError, Result};

/// Shape-preserving masked transform shared by every layer of the stack.
pub trait DecoderLayer {
    /// Map (batch, seq_len, dim_model) to the same shape.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor>;
}

impl DecoderLayer for DecoderBlock {
    fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        DecoderBlock::forward_t(self, x, mask, train)
    }
}

/// N independently parameterized decoder blocks applied in order.
///
/// With pre-norm blocks the stack ends in a final layer norm, since the last
/// residual stream is otherwise never normalized.
pub struct CompositeDecoder {
    layers: Vec<DecoderBlock>,
    norm: Option<LayerNorm>,
}

impl CompositeDecoder {
    /// Create `config.num_layers_per_stack` blocks under `layers.{i}`.
    ///
    /// # Errors
    /// Returns [`GptError::Configuration`] for an empty stack, or an error if
    /// weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_layers_per_stack == 0 {
            return Err(GptError::config("num_layers_per_stack must be positive"));
        }

        let layers = (0..config.num_layers_per_stack)
            .map(|i| DecoderBlock::new(config, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;

        let norm = match config.norm_placement {
            NormPlacement::Pre => Some(init::layer_norm(
                config.dim_model,
                config.layer_norm_eps,
                vb.pp("norm"),
            )?),
            NormPlacement::Post => None,
        };

        Ok(Self { layers, norm })
    }

    #[must_use]
    pub fn layers(&self) -> &[DecoderBlock] {
        &self.layers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl DecoderLayer for CompositeDecoder {
    fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = DecoderLayer::forward_t(layer, &x, mask, train)?;
        }
        match &self.norm {
            Some(norm) => Ok(norm.forward(&x)?),
            None => Ok(x),
        }
    }
}
