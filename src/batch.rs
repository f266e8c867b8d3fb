//! Input batches: token ids plus the attention mask.

use candle_core::{DType, Tensor};

use crate::error::{GptError, Result};
use crate::model::attention::{causal_mask, padding_mask};

/// Token ids with the mask saying which positions may attend to which.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Token ids of shape (batch, seq_len)
    pub src: Tensor,
    /// `u8` mask broadcastable to (batch, heads, seq_len, seq_len), 1 = attend
    pub src_mask: Tensor,
}

impl Batch {
    /// Pair ids with a caller-supplied mask.
    ///
    /// Non-`u8` masks are converted with `!= 0`. A per-example (batch, T, T)
    /// mask gets a unit heads axis so it lines up with (batch, heads, T, T).
    ///
    /// # Errors
    /// Returns an error if `src` is not 2-D or the mask rank is outside 2..=4.
    pub fn new(src: Tensor, src_mask: Tensor) -> Result<Self> {
        src.dims2()?;
        let rank = src_mask.rank();
        if !(2..=4).contains(&rank) {
            return Err(GptError::Tensor(candle_core::Error::Msg(format!(
                "src_mask must have rank 2 to 4, got shape {:?}",
                src_mask.dims()
            ))));
        }
        let src_mask = if src_mask.dtype() == DType::U8 {
            src_mask
        } else {
            src_mask.ne(&src_mask.zeros_like()?)?
        };
        let src_mask = if rank == 3 {
            src_mask.unsqueeze(1)?
        } else {
            src_mask
        };
        Ok(Self { src, src_mask })
    }

    /// Batch with a lower-triangular mask.
    ///
    /// # Errors
    /// Returns an error if `src` is not 2-D.
    pub fn causal(src: Tensor) -> Result<Self> {
        let (_, t) = src.dims2()?;
        let src_mask = causal_mask(t, src.device())?;
        Ok(Self { src, src_mask })
    }

    /// Causal batch that also blocks attention to `pad_id` keys.
    ///
    /// # Errors
    /// Returns an error if `src` is not 2-D.
    pub fn with_padding(src: Tensor, pad_id: u32) -> Result<Self> {
        let (_, t) = src.dims2()?;
        let causal = causal_mask(t, src.device())?;
        let keys = padding_mask(&src, pad_id)?;
        let src_mask = causal.broadcast_mul(&keys)?;
        Ok(Self { src, src_mask })
    }

    /// (batch_size, seq_len)
    ///
    /// # Errors
    /// Returns an error if `src` is not 2-D.
    pub fn dims(&self) -> Result<(usize, usize)> {
        Ok(self.src.dims2()?)
    }
}
