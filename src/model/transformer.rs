//! GPT decoder-only transformer.
//!
//! Token embedding, learned positional encoding, a stack of causally masked
//! decoder blocks, and a linear projection to vocabulary logits.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap};

use super::config::GptConfig;
use super::decoder::{CompositeDecoder, DecoderLayer};
use super::embedding::{PositionalEncoding, TokenEmbedding};
use super::init;
use crate::batch::Batch;
use crate::error::{GptError, Result};

/// Decoder-only GPT language model.
///
/// Returns raw logits; softmax and loss belong to the caller.
pub struct Gpt {
    embeddings: TokenEmbedding,
    pos_encoding: PositionalEncoding,
    decoder: CompositeDecoder,
    /// Projection dim_model -> vocab_size
    final_linear: Linear,
    config: GptConfig,
    device: Device,
}

impl Gpt {
    /// Build the model from a variable builder.
    ///
    /// With a `VarMap`-backed builder the parameters are freshly initialized;
    /// with a builder over existing tensors they are loaded by name.
    ///
    /// # Errors
    /// Returns [`GptError::Configuration`] for an invalid config, or an error
    /// if weight creation or loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: GptConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let embeddings = TokenEmbedding::new(&config, vb.pp("embeddings"))?;
        let pos_encoding = PositionalEncoding::new(&config, vb.pp("pos_encoding"))?;
        let decoder = CompositeDecoder::new(&config, vb.pp("decoder"))?;
        let final_linear = init::linear(
            config.dim_model,
            config.vocab_size,
            config.init_std,
            vb.pp("final_linear"),
        )?;

        tracing::debug!(
            vocab_size = config.vocab_size,
            layers = config.num_layers_per_stack,
            dim_model = config.dim_model,
            num_heads = config.num_heads,
            block_size = config.block_size,
            norm = ?config.norm_placement,
            "constructed GPT decoder"
        );

        Ok(Self {
            embeddings,
            pos_encoding,
            decoder,
            final_linear,
            config,
            device,
        })
    }

    /// Create a freshly initialized model whose parameters live in `varmap`.
    ///
    /// # Errors
    /// See [`Gpt::new`].
    pub fn init(config: GptConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        tracing::debug!(parameters = parameter_count(varmap), "initialized parameters");
        Ok(model)
    }

    /// Forward pass through the model.
    ///
    /// # Arguments
    /// * `batch` - Token ids (batch, seq_len) and attention mask
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Logits of shape (batch, seq_len, vocab_size)
    ///
    /// # Errors
    /// Returns a tensor error for an empty batch or sequence,
    /// [`GptError::SequenceLength`] if `seq_len > block_size`,
    /// [`GptError::IndexRange`] for out-of-vocabulary ids, or a tensor error
    /// for an incompatible mask.
    pub fn forward_t(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let (b, t) = batch.dims()?;
        if b == 0 || t == 0 {
            let msg = format!("empty input batch of shape ({b}, {t})");
            return Err(candle_core::Error::Msg(msg).into());
        }
        if t > self.config.block_size {
            return Err(GptError::SequenceLength {
                seq_len: t,
                block_size: self.config.block_size,
            });
        }
        tracing::trace!(batch = b, seq_len = t, train, "gpt forward");

        let x = self.embeddings.forward(&batch.src)?;
        let x = self.pos_encoding.forward_t(&x, train)?;
        let x = self.decoder.forward_t(&x, &batch.src_mask, train)?;

        // Don't apply softmax; the loss expects raw logits.
        Ok(self.final_linear.forward(&x)?)
    }

    /// Inference-mode forward pass.
    ///
    /// # Errors
    /// See [`Gpt::forward_t`].
    pub fn forward(&self, batch: &Batch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }

    /// Logits for the last position only, under a causal mask.
    ///
    /// # Arguments
    /// * `input_ids` - Token ids of shape (batch, seq_len)
    ///
    /// # Returns
    /// Logits of shape (batch, vocab_size)
    ///
    /// # Errors
    /// See [`Gpt::forward_t`].
    pub fn forward_last(&self, input_ids: &Tensor) -> Result<Tensor> {
        let batch = Batch::causal(input_ids.clone())?;
        let logits = self.forward(&batch)?;
        let (_, t, _) = logits.dims3()?;
        Ok(logits.narrow(1, t - 1, 1)?.squeeze(1)?)
    }

    #[must_use]
    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub fn decoder(&self) -> &CompositeDecoder {
        &self.decoder
    }
}

/// Total number of scalar parameters held by `varmap`.
#[must_use]
pub fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> (Gpt, VarMap) {
        let varmap = VarMap::new();
        let model = Gpt::init(GptConfig::tiny(50), &varmap, &Device::Cpu).unwrap();
        (model, varmap)
    }

    #[test]
    fn test_forward_shapes_with_random_init() {
        let (model, _vm) = tiny();
        let input = Tensor::zeros((2, 8), DType::U32, &Device::Cpu).unwrap();
        let logits = model.forward(&Batch::causal(input).unwrap()).unwrap();
        assert_eq!(logits.dims(), &[2, 8, 50]);
    }

    #[test]
    fn test_shorter_sequences_accepted() {
        let (model, _vm) = tiny();
        for t in 1..=8 {
            let input = Tensor::zeros((3, t), DType::U32, &Device::Cpu).unwrap();
            let logits = model.forward(&Batch::causal(input).unwrap()).unwrap();
            assert_eq!(logits.dims(), &[3, t, 50]);
        }
    }

    #[test]
    fn test_forward_last() {
        let (model, _vm) = tiny();
        let input = Tensor::new(&[[1u32, 2, 3], [4, 5, 6]], &Device::Cpu).unwrap();
        let last = model.forward_last(&input).unwrap();
        assert_eq!(last.dims(), &[2, 50]);

        let full = model.forward(&Batch::causal(input).unwrap()).unwrap();
        let expected: Vec<Vec<f32>> = full.narrow(1, 2, 1).unwrap().squeeze(1).unwrap().to_vec2().unwrap();
        let got: Vec<Vec<f32>> = last.to_vec2().unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_empty_sequence_rejected_up_front() {
        let (model, _vm) = tiny();
        let input = Tensor::zeros((1, 0), DType::U32, &Device::Cpu).unwrap();
        match model.forward_last(&input) {
            Err(GptError::Tensor(e)) => assert!(e.to_string().contains("empty input")),
            other => panic!("expected empty-input error, got {other:?}"),
        }
        let batch = Batch::causal(Tensor::zeros((0, 4), DType::U32, &Device::Cpu).unwrap()).unwrap();
        assert!(model.forward(&batch).is_err());
    }

    #[test]
    fn test_invalid_config_rejected_before_allocation() {
        let varmap = VarMap::new();
        let config = GptConfig {
            dim_model: 100,
            num_heads: 7,
            ..GptConfig::tiny(50)
        };
        assert!(matches!(
            Gpt::init(config, &varmap, &Device::Cpu),
            Err(GptError::Configuration(_))
        ));
        assert_eq!(parameter_count(&varmap), 0);
    }

    #[test]
    fn test_parameter_count() {
        let (_model, varmap) = tiny();
        let (v, d, f, t, l) = (50, 32, 128, 8, 2);
        let per_block = 4 * (d * d + d) + (d * f + f) + (f * d + d) + 2 * 2 * d;
        let expected = v * d + t * d + l * per_block + 2 * d + (d * v + v);
        assert_eq!(parameter_count(&varmap), expected);
    }
}
