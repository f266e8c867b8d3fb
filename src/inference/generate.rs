//! Autoregressive generation loop.
//!
//! Repeatedly runs `model.forward_last` over the most recent `block_size`
//! tokens and appends the selected id.

use candle_core::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{GptError, Result};
use crate::inference::sampling::sample;
use crate::model::Gpt;

/// Generation settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    /// Non-positive means greedy decoding
    pub temperature: f32,
    /// 0 disables top-k filtering
    pub top_k: usize,
    pub seed: Option<u64>,
    /// Stop once this id has been produced
    pub eos_id: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 64,
            temperature: 1.0,
            top_k: 0,
            seed: None,
            eos_id: None,
        }
    }
}

/// Extend `prompt` by up to `cfg.max_new_tokens` ids.
///
/// Returns the full token stream (prompt + generated).
///
/// # Errors
/// Returns [`GptError::Configuration`] for an empty prompt, or any error
/// raised by the forward pass (e.g. an out-of-vocabulary prompt id).
pub fn generate(model: &Gpt, prompt: &[u32], cfg: &GenerationConfig) -> Result<Vec<u32>> {
    if prompt.is_empty() {
        return Err(GptError::config("generation needs a non-empty prompt"));
    }

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let block_size = model.config().block_size;
    let mut tokens = prompt.to_vec();

    for step in 0..cfg.max_new_tokens {
        let ctx = &tokens[tokens.len().saturating_sub(block_size)..];
        let input = Tensor::new(ctx, model.device())?.unsqueeze(0)?;
        let logits: Vec<f32> = model.forward_last(&input)?.squeeze(0)?.to_vec1()?;

        let next = sample(&logits, cfg.temperature, cfg.top_k, &mut rng);
        tracing::trace!(step, context = ctx.len(), next, "generated token");
        tokens.push(next);

        if cfg.eos_id == Some(next) {
            break;
        }
    }

    Ok(tokens)
}
