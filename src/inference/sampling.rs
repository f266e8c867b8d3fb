//! Next-token selection from a logits row.

use rand::Rng;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;

/// Pick a token id from `logits`.
///
/// Non-positive `temperature` means greedy argmax. Otherwise logits are divided
/// by the temperature, optionally restricted to the `top_k` largest (0 keeps
/// all) and sampled from the resulting softmax.
#[must_use]
pub fn sample(logits: &[f32], temperature: f32, top_k: usize, rng: &mut impl Rng) -> u32 {
    if temperature <= 0.0 {
        return argmax(logits);
    }

    let mut scaled: Vec<f32> = logits.iter().map(|v| v / temperature).collect();
    if top_k > 0 && top_k < scaled.len() {
        let mut sorted: Vec<f32> = scaled.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        if let Some(&kth) = sorted.get(top_k - 1) {
            for v in &mut scaled {
                if *v < kth {
                    *v = f32::NEG_INFINITY;
                }
            }
        }
    }

    let max = scaled
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return argmax(logits);
    }
    let weights: Vec<f32> = scaled.iter().map(|v| (v - max).exp()).collect();

    match WeightedIndex::new(&weights) {
        #[allow(clippy::cast_possible_truncation)]
        Ok(dist) => dist.sample(rng) as u32,
        Err(_) => argmax(logits),
    }
}

/// Index of the largest finite logit (0 if none).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0 as u32
}
