//! Token embedding and learned positional encoding.

use candle_core::{DType, Tensor};
use candle_nn::{Dropout, Embedding, Module, VarBuilder};

use super::config::GptConfig;
use super::init;
use crate::error::{GptError, Result};

/// Token embedding scaled by `sqrt(dim_model)`.
pub struct TokenEmbedding {
    /// Lookup table (vocab_size, dim_model)
    lut: Embedding,
    vocab_size: usize,
    scale: f64,
}

impl TokenEmbedding {
    /// Create a new token embedding layer.
    ///
    /// # Errors
    /// Returns an error if the weight cannot be created or loaded.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let lut = init::embedding(config.vocab_size, config.dim_model, config.init_std, vb)?;
        #[allow(clippy::cast_precision_loss)]
        let scale = (config.dim_model as f64).sqrt();
        Ok(Self {
            lut,
            vocab_size: config.vocab_size,
            scale,
        })
    }

    /// Look up and scale embeddings.
    ///
    /// # Arguments
    /// * `token_ids` - Integer tensor of shape (batch, seq_len)
    ///
    /// # Returns
    /// Embeddings of shape (batch, seq_len, dim_model)
    ///
    /// # Errors
    /// Returns [`GptError::IndexRange`] if any id is outside `[0, vocab_size)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.check_range(token_ids)?;
        let x = self.lut.forward(token_ids)?;
        Ok((x * self.scale)?)
    }

    fn check_range(&self, token_ids: &Tensor) -> Result<()> {
        if token_ids.elem_count() == 0 {
            return Ok(());
        }
        let ids = token_ids.flatten_all()?.to_dtype(DType::I64)?;
        let min = ids.min(0)?.to_scalar::<i64>()?;
        let max = ids.max(0)?.to_scalar::<i64>()?;
        let vocab = i64::try_from(self.vocab_size).unwrap_or(i64::MAX);
        let bad = if min < 0 {
            Some(min)
        } else if max >= vocab {
            Some(max)
        } else {
            None
        };
        match bad {
            Some(id) => Err(GptError::IndexRange {
                id,
                vocab_size: self.vocab_size,
            }),
            None => Ok(()),
        }
    }

    /// Raw (unscaled) table.
    #[must_use]
    pub fn weights(&self) -> &Tensor {
        self.lut.embeddings()
    }
}

/// Learned absolute positional encoding followed by dropout.
pub struct PositionalEncoding {
    /// Position table (block_size, dim_model)
    table: Tensor,
    dropout: Dropout,
    block_size: usize,
}

impl PositionalEncoding {
    /// Create a new positional encoding layer.
    ///
    /// # Errors
    /// Returns an error if the weight cannot be created or loaded.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let table = init::table(config.block_size, config.dim_model, config.init_std, vb)?;
        Ok(Self {
            table,
            dropout: Dropout::new(config.dropout),
            block_size: config.block_size,
        })
    }

    /// Add the position vectors for `0..seq_len` and apply dropout.
    ///
    /// # Arguments
    /// * `x` - Embeddings of shape (batch, seq_len, dim_model)
    /// * `train` - Whether dropout is active
    ///
    /// # Errors
    /// Returns [`GptError::SequenceLength`] if `seq_len > block_size`.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len, _) = x.dims3()?;
        if seq_len > self.block_size {
            return Err(GptError::SequenceLength {
                seq_len,
                block_size: self.block_size,
            });
        }
        let pe = self.table.narrow(0, 0, seq_len)?;
        let x = x.broadcast_add(&pe)?;
        Ok(self.dropout.forward(&x, train)?)
    }

    #[must_use]
    pub fn weights(&self) -> &Tensor {
        &self.table
    }
}
