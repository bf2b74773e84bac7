//! Moving-average series decomposition.

use candle_core::{Result, Tensor};

/// Kernel used by the DLinear backbones.
pub const DEFAULT_KERNEL: usize = 25;

/// Splits a series into a moving-average trend and the seasonal residual.
#[derive(Debug, Clone, Copy)]
pub struct SeriesDecomposition {
    kernel: usize,
}

impl SeriesDecomposition {
    /// Create a decomposition with an odd `kernel` length.
    pub fn new(kernel: usize) -> Self {
        Self {
            kernel: kernel.max(1),
        }
    }

    /// Kernel length.
    pub fn kernel(&self) -> usize {
        self.kernel
    }

    /// Moving average over the time axis of `x [B, L, C]`.
    ///
    /// Both ends are padded by repeating the first and last row so the
    /// output keeps length `L`.
    pub fn moving_average(&self, x: &Tensor) -> Result<Tensor> {
        let (_, len, _) = x.dims3()?;
        let pad = (self.kernel - 1) / 2;

        let mut parts = Vec::with_capacity(3);
        if pad > 0 {
            let front = x.narrow(1, 0, 1)?.repeat((1, pad, 1))?;
            let end = x.narrow(1, len - 1, 1)?.repeat((1, pad, 1))?;
            parts.push(front);
            parts.push(x.clone());
            parts.push(end);
        } else {
            parts.push(x.clone());
        }
        let padded = Tensor::cat(&parts, 1)?;

        let out_len = len + 2 * pad + 1 - self.kernel;
        let mut acc = padded.narrow(1, 0, out_len)?;
        for offset in 1..self.kernel {
            acc = (acc + padded.narrow(1, offset, out_len)?)?;
        }
        acc / self.kernel as f64
    }

    /// `(seasonal, trend)` parts of `x [B, L, C]`.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let trend = self.moving_average(x)?;
        let seasonal = (x - &trend)?;
        Ok((seasonal, trend))
    }
}

impl Default for SeriesDecomposition {
    fn default() -> Self {
        Self::new(DEFAULT_KERNEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_constant_series_has_flat_trend() {
        let device = Device::Cpu;
        let x = Tensor::full(3f32, (2, 30, 4), &device).unwrap();
        let (seasonal, trend) = SeriesDecomposition::default().forward(&x).unwrap();

        assert_eq!(trend.dims(), &[2, 30, 4]);
        let s: f32 = seasonal.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert!(s < 1e-4);
    }

    #[test]
    fn test_edge_padding() {
        let device = Device::Cpu;
        // 0, 1, 2, 3, 4 with kernel 3: edges repeat the first/last value
        let x = Tensor::from_vec(vec![0f32, 1., 2., 3., 4.], (1, 5, 1), &device).unwrap();
        let trend = SeriesDecomposition::new(3).moving_average(&x).unwrap();
        let values: Vec<f32> = trend.flatten_all().unwrap().to_vec1().unwrap();

        let expected = [1.0 / 3.0, 1.0, 2.0, 3.0, 11.0 / 3.0];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-5);
        }
    }
}
