//! Reversible instance normalization.
//!
//! Each input window is standardized per channel with its own statistics;
//! the forecast is mapped back with the same statistics. A learnable affine
//! transform sits between the two.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

const EPS: f64 = 1e-5;

/// Per-window statistics captured by [`RevIn::normalize`].
#[derive(Debug, Clone)]
pub struct WindowStats {
    mean: Tensor,
    std: Tensor,
}

/// Reversible instance normalization over `C` channels.
#[derive(Debug, Clone)]
pub struct RevIn {
    weight: Tensor,
    bias: Tensor,
}

impl RevIn {
    /// Create with affine weight initialized to one and bias to zero.
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(channels, "affine_weight", candle_nn::Init::Const(1.0))?;
        let bias = vb.get_with_hints(channels, "affine_bias", candle_nn::Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }

    /// Normalize `x [B, L, C]` over the time axis.
    pub fn normalize(&self, x: &Tensor) -> Result<(Tensor, WindowStats)> {
        let mean = x.mean_keepdim(1)?.detach();
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(1)?;
        let std = (var + EPS)?.sqrt()?.detach();

        let x = centered.broadcast_div(&std)?;
        let x = x.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)?;
        Ok((x, WindowStats { mean, std }))
    }

    /// Undo [`RevIn::normalize`] on `y [B, L', C]`.
    pub fn denormalize(&self, y: &Tensor, stats: &WindowStats) -> Result<Tensor> {
        let y = y.broadcast_sub(&self.bias)?;
        let y = y.broadcast_div(&(&self.weight + EPS * EPS)?)?;
        y.broadcast_mul(&stats.std)?.broadcast_add(&stats.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_normalize_then_denormalize() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let revin = RevIn::new(3, vb).unwrap();

        let x = (Tensor::randn(0f32, 5.0, (2, 16, 3), &device).unwrap() + 10.0).unwrap();
        let (normed, stats) = revin.normalize(&x).unwrap();

        let mean: Vec<f32> = normed
            .mean(1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-4));

        let restored = revin.denormalize(&normed, &stats).unwrap();
        let diff: f32 = (restored - &x)
            .unwrap()
            .abs()
            .unwrap()
            .max_keepdim(1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-3);
    }
}
