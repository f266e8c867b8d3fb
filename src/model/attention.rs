//! Multi-head causal self-attention and mask construction.

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};

use super::config::GptConfig;
use super::init;
use crate::error::Result;

/// Value written into blocked attention logits before the softmax.
///
/// Finite so that a row with every key blocked becomes uniform instead of NaN.
/// `f16` cannot hold it, so half-precision scores use [`mask_fill`] instead.
pub const MASK_FILL: f32 = -1e9;

/// Fill value for blocked logits of the given dtype.
///
/// [`MASK_FILL`] for every float type except `f16`, which gets its most
/// negative finite value.
#[must_use]
pub fn mask_fill(dtype: DType) -> f32 {
    match dtype {
        DType::F16 => -65504.0,
        _ => MASK_FILL,
    }
}

/// Multi-head self-attention.
///
/// Queries, keys and values are projections of the same input; the model
/// dimension is split evenly across heads.
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    /// Output projection (dim_model -> dim_model)
    out_proj: Linear,
    /// Dropout on attention weights
    attn_dropout: Dropout,
    /// Dropout on the projected output
    resid_dropout: Dropout,
    num_heads: usize,
    dim_model: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    /// Create a new attention layer.
    ///
    /// # Errors
    /// Returns an error if weight creation or loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.dim_model;
        let std = config.init_std;
        Ok(Self {
            q_proj: init::linear(dim, dim, std, vb.pp("q_proj"))?,
            k_proj: init::linear(dim, dim, std, vb.pp("k_proj"))?,
            v_proj: init::linear(dim, dim, std, vb.pp("v_proj"))?,
            out_proj: init::linear(dim, dim, std, vb.pp("out_proj"))?,
            attn_dropout: Dropout::new(config.attention_dropout()),
            resid_dropout: Dropout::new(config.residual_dropout()),
            num_heads: config.num_heads,
            dim_model: dim,
            head_dim: config.head_dim(),
        })
    }

    /// (B, T, C) -> (B, n_head, T, head_dim)
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        Ok(x.reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// Masked, normalized attention weights of shape (B, n_head, T, T).
    fn probs(&self, q: &Tensor, k: &Tensor, mask: &Tensor) -> Result<Tensor> {
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let scores = (q.matmul(&k_t)? * scale)?;
        let scores = apply_mask(&scores, mask)?;
        Ok(candle_nn::ops::softmax_last_dim(&scores)?)
    }

    /// Attention weights for `x` without dropout, for inspection.
    ///
    /// # Errors
    /// Returns an error if `mask` does not broadcast to (B, n_head, T, T).
    pub fn attention_probs(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let q = self.split_heads(&self.q_proj.forward(x)?)?;
        let k = self.split_heads(&self.k_proj.forward(x)?)?;
        self.probs(&q, &k, mask)
    }

    /// Forward pass for self-attention.
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, dim_model)
    /// * `mask` - `u8` mask broadcastable to (batch, n_head, seq_len, seq_len), 1 = attend
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Output tensor of shape (batch, seq_len, dim_model)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail or the mask has an incompatible shape.
    #[allow(clippy::many_single_char_names)]
    pub fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(x)?)?;
        let k = self.split_heads(&self.k_proj.forward(x)?)?;
        let v = self.split_heads(&self.v_proj.forward(x)?)?;

        let att = self.probs(&q, &k, mask)?;
        let att = self.attn_dropout.forward(&att, train)?;

        // (B, n_head, T, T) @ (B, n_head, T, head_dim)
        let y = att.matmul(&v)?;
        let y = y
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.dim_model))?;

        let y = self.out_proj.forward(&y)?;
        Ok(self.resid_dropout.forward(&y, train)?)
    }
}

/// Replace blocked logits with the dtype's [`mask_fill`] value.
fn apply_mask(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let shape = scores.dims();
    let mask = mask.broadcast_as(shape)?;
    let fill = Tensor::new(mask_fill(scores.dtype()), scores.device())?
        .to_dtype(scores.dtype())?
        .broadcast_as(shape)?;
    Ok(mask.where_cond(scores, &fill)?)
}

/// Lower-triangular mask: entry (i, j) is 1 if j <= i, else 0.
///
/// Returns a `u8` tensor of shape (1, 1, seq_len, seq_len).
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let idx = Tensor::arange(0u32, u32::try_from(seq_len).unwrap_or(u32::MAX), device)?;
    let rows = idx.unsqueeze(1)?;
    let cols = idx.unsqueeze(0)?;
    let mask = rows.broadcast_ge(&cols)?;
    Ok(mask.reshape((1, 1, seq_len, seq_len))?)
}

/// Key-padding mask: 1 where `src` differs from `pad_id`.
///
/// Returns a `u8` tensor of shape (batch, 1, 1, seq_len).
///
/// # Errors
/// Returns an error if `src` is not a (batch, seq_len) tensor.
pub fn padding_mask(src: &Tensor, pad_id: u32) -> Result<Tensor> {
    let (b, t) = src.dims2()?;
    let src = src.to_dtype(DType::U32)?;
    let pad = Tensor::full(pad_id, (b, t), src.device())?;
    Ok(src.ne(&pad)?.reshape((b, 1, 1, t))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn build(config: &GptConfig) -> (MultiHeadAttention, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = MultiHeadAttention::new(config, vb.pp("attn")).unwrap();
        (attn, varmap)
    }

    #[test]
    fn test_causal_mask_shape() {
        let mask = causal_mask(4, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 4, 4]);
        assert_eq!(mask.dtype(), DType::U8);
    }

    #[test]
    fn test_causal_mask_values() {
        let mask = causal_mask(3, &Device::Cpu).unwrap();
        let values: Vec<Vec<u8>> = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(values, vec![vec![1, 0, 0], vec![1, 1, 0], vec![1, 1, 1]]);
    }

    #[test]
    fn test_padding_mask_blocks_pad_keys() {
        let src = Tensor::new(&[[5u32, 6, 0], [0, 1, 2]], &Device::Cpu).unwrap();
        let mask = padding_mask(&src, 0).unwrap();
        assert_eq!(mask.dims(), &[2, 1, 1, 3]);
        let flat: Vec<u8> = mask.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(flat, vec![1, 1, 0, 0, 1, 1]);
    }

    #[test]
    fn test_future_weights_are_exactly_zero() {
        let config = GptConfig::tiny(10);
        let (attn, _vm) = build(&config);
        let x = Tensor::randn(0f32, 1.0, (2, 6, 32), &Device::Cpu).unwrap();
        let mask = causal_mask(6, &Device::Cpu).unwrap();

        let probs = attn.attention_probs(&x, &mask).unwrap();
        assert_eq!(probs.dims(), &[2, 4, 6, 6]);
        let probs: Vec<f32> = probs.flatten_all().unwrap().to_vec1().unwrap();
        for (n, p) in probs.iter().enumerate() {
            let (i, j) = ((n / 6) % 6, n % 6);
            if j > i {
                assert_eq!(*p, 0.0, "weight leaked to future position ({i}, {j})");
            }
        }
        // Rows are distributions.
        for row in probs.chunks(6) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_fully_masked_row_is_finite() {
        let config = GptConfig::tiny(10);
        let (attn, _vm) = build(&config);
        let x = Tensor::randn(0f32, 1.0, (1, 3, 32), &Device::Cpu).unwrap();
        let mask = Tensor::zeros((1, 1, 3, 3), DType::U8, &Device::Cpu).unwrap();

        let out = attn.forward_t(&x, &mask, false).unwrap();
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_output_shape_matches_input() {
        let config = GptConfig::tiny(10);
        let (attn, _vm) = build(&config);
        let x = Tensor::randn(0f32, 1.0, (3, 5, 32), &Device::Cpu).unwrap();
        let mask = causal_mask(5, &Device::Cpu).unwrap();
        let out = attn.forward_t(&x, &mask, true).unwrap();
        assert_eq!(out.dims(), x.dims());
    }

    #[test]
    fn test_half_precision_fill_stays_finite() {
        let scores = Tensor::randn(0f32, 1.0, (1, 2, 3, 3), &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F16)
            .unwrap();
        let mask = Tensor::zeros((1, 1, 3, 3), DType::U8, &Device::Cpu).unwrap();

        let filled = apply_mask(&scores, &mask).unwrap().to_dtype(DType::F32).unwrap();
        let values: Vec<f32> = filled.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite() && *v == -65504.0));

        let probs = candle_nn::ops::softmax_last_dim(&filled).unwrap();
        let probs: Vec<f32> = probs.flatten_all().unwrap().to_vec1().unwrap();
        assert!(probs.iter().all(|p| (p - 1.0 / 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_mask_fill_by_dtype() {
        assert_eq!(mask_fill(DType::F32), MASK_FILL);
        assert_eq!(mask_fill(DType::BF16), MASK_FILL);
        assert!(half_fits(mask_fill(DType::F16)));
    }

    fn half_fits(v: f32) -> bool {
        let t = Tensor::new(v, &Device::Cpu).unwrap().to_dtype(DType::F16).unwrap();
        t.to_dtype(DType::F32).unwrap().to_scalar::<f32>().unwrap().is_finite()
    }

    #[test]
    fn test_large_logits_do_not_overflow() {
        let config = GptConfig::tiny(10);
        let (attn, _vm) = build(&config);
        let x = (Tensor::randn(0f32, 1.0, (1, 4, 32), &Device::Cpu).unwrap() * 1e4).unwrap();
        let mask = causal_mask(4, &Device::Cpu).unwrap();
        let probs = attn.attention_probs(&x, &mask).unwrap();
        let values: Vec<f32> = probs.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
