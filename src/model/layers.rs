//! Feed-forward sublayer, residual wrapper and decoder block.

use candle_core::Tensor;
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

use super::attention::MultiHeadAttention;
use super::config::{Activation, GptConfig, NormPlacement};
use super::init;
use crate::error::Result;

/// Position-wise feed-forward network.
///
/// expand (dim_model -> dim_ffn) -> activation -> contract (dim_ffn -> dim_model)
pub struct PositionWiseFfn {
    expand: Linear,
    contract: Linear,
    activation: Activation,
}

impl PositionWiseFfn {
    /// Create a new feed-forward sublayer.
    ///
    /// # Errors
    /// Returns an error if weight creation or loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let std = config.init_std;
        Ok(Self {
            expand: init::linear(config.dim_model, config.dim_ffn, std, vb.pp("expand"))?,
            contract: init::linear(config.dim_ffn, config.dim_model, std, vb.pp("contract"))?,
            activation: config.activation,
        })
    }

    /// Apply the network independently at every position.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.expand.forward(x)?;
        let h = match self.activation {
            Activation::Gelu => h.gelu_erf()?,
            Activation::GeluTanh => h.gelu()?,
            Activation::Relu => h.relu()?,
        };
        Ok(self.contract.forward(&h)?)
    }
}

/// Residual connection around a sublayer with layer normalization.
///
/// The sublayer output goes through dropout before it is added back. On the
/// attention path that output has already passed the attention layer's own
/// residual dropout, so both apply in training (keep rate `(1 - p)^2`). Both
/// use `residual_dropout`; set it to 0 to disable the pair.
pub struct SublayerConnection {
    norm: LayerNorm,
    dropout: Dropout,
    placement: NormPlacement,
}

impl SublayerConnection {
    #[allow(clippy::needless_pass_by_value)]
    fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm: init::layer_norm(config.dim_model, config.layer_norm_eps, vb)?,
            dropout: Dropout::new(config.residual_dropout()),
            placement: config.norm_placement,
        })
    }

    /// Apply `sublayer` to `x` with the configured normalization placement.
    ///
    /// # Errors
    /// Propagates any error from `sublayer` or the tensor operations.
    pub fn forward_t<F>(&self, x: &Tensor, train: bool, sublayer: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        match self.placement {
            NormPlacement::Pre => {
                let h = sublayer(&self.norm.forward(x)?)?;
                let h = self.dropout.forward(&h, train)?;
                Ok((x + h)?)
            }
            NormPlacement::Post => {
                let h = sublayer(x)?;
                let h = self.dropout.forward(&h, train)?;
                Ok(self.norm.forward(&(x + h)?)?)
            }
        }
    }
}

/// One decoder layer: masked self-attention then feed-forward, each residual.
pub struct DecoderBlock {
    attn_connection: SublayerConnection,
    attn: MultiHeadAttention,
    ffn_connection: SublayerConnection,
    ffn: PositionWiseFfn,
}

impl DecoderBlock {
    /// Create a new decoder block.
    ///
    /// # Errors
    /// Returns an error if weight creation or loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attn_connection: SublayerConnection::new(config, vb.pp("attn_norm"))?,
            attn: MultiHeadAttention::new(config, vb.pp("attn"))?,
            ffn_connection: SublayerConnection::new(config, vb.pp("ffn_norm"))?,
            ffn: PositionWiseFfn::new(config, vb.pp("ffn"))?,
        })
    }

    /// Attention sublayer of this block.
    #[must_use]
    pub fn attention(&self) -> &MultiHeadAttention {
        &self.attn
    }

    /// Forward pass through the block.
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, dim_model)
    /// * `mask` - Attention mask, see [`MultiHeadAttention::forward_t`]
    /// * `train` - Whether dropout is active
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let x = self
            .attn_connection
            .forward_t(x, train, |h| self.attn.forward_t(h, mask, train))?;
        self.ffn_connection
            .forward_t(&x, train, |h| self.ffn.forward(h))
    }
}
