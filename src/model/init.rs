//! Parameter constructors with role-based initialization.
//!
//! Weights of linear and embedding layers draw from N(0, std^2), biases start
//! at zero, and layer norms start as the identity (scale 1, shift 0). When the
//! `VarBuilder` is backed by existing tensors the hints are ignored and the
//! stored values are used as-is.

use candle_core::Result;
use candle_nn::init::Init;
use candle_nn::{Embedding, LayerNorm, LayerNormConfig, Linear, VarBuilder};

fn normal(std: f64) -> Init {
    Init::Randn {
        mean: 0.0,
        stdev: std,
    }
}

/// Affine projection `in_dim -> out_dim` with bias.
#[allow(clippy::needless_pass_by_value)]
pub fn linear(in_dim: usize, out_dim: usize, std: f64, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", normal(std))?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Lookup table with `rows` entries of width `dim`.
#[allow(clippy::needless_pass_by_value)]
pub fn embedding(rows: usize, dim: usize, std: f64, vb: VarBuilder) -> Result<Embedding> {
    let table = vb.get_with_hints((rows, dim), "weight", normal(std))?;
    Ok(Embedding::new(table, dim))
}

/// Learned dense parameter of the given shape, no lookup semantics.
#[allow(clippy::needless_pass_by_value)]
pub fn table(rows: usize, dim: usize, std: f64, vb: VarBuilder) -> Result<candle_core::Tensor> {
    vb.get_with_hints((rows, dim), "weight", normal(std))
}

/// Layer norm over the last dimension, scale 1 and shift 0.
#[allow(clippy::needless_pass_by_value)]
pub fn layer_norm(dim: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let config = LayerNormConfig {
        eps,
        ..LayerNormConfig::default()
    };
    candle_nn::layer_norm(dim, config, vb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_roles_initialize_differently() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let lin = linear(64, 32, 0.02, vb.pp("proj")).unwrap();
        let norm = layer_norm(32, 1e-5, vb.pp("norm")).unwrap();

        let bias: Vec<f32> = lin.bias().unwrap().to_vec1().unwrap();
        assert!(bias.iter().all(|&b| b == 0.0));

        let weight: Vec<f32> = lin.weight().flatten_all().unwrap().to_vec1().unwrap();
        assert!(weight.iter().any(|&w| w != 0.0));
        assert!(weight.iter().all(|w| w.abs() < 0.2));

        let scale: Vec<f32> = norm.weight().to_vec1().unwrap();
        assert!(scale.iter().all(|&s| s == 1.0));
        let shift: Vec<f32> = norm.bias().unwrap().to_vec1().unwrap();
        assert!(shift.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_shapes_follow_torch_layout() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let lin = linear(16, 48, 0.02, vb.pp("qkv")).unwrap();
        assert_eq!(lin.weight().dims(), &[48, 16]);
        let emb = embedding(10, 16, 0.02, vb.pp("emb")).unwrap();
        assert_eq!(emb.embeddings().dims(), &[10, 16]);
    }
}
