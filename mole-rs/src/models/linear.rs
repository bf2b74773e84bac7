//! Linear backbones mapping the time axis of a window to a horizon.
//!
//! - DLinear: seasonal and trend parts projected separately, then summed
//! - RLinear: reversible instance normalization around a single projection
//! - RMLP: RLinear with a residual MLP over the time axis before projecting
//!
//! A [`Backbone`] produces `[B, C, out_len]` in channel-first layout. The
//! non-gated baselines use `out_len = pred_len`; the mixture model asks for
//! `pred_len * K` and splits it into heads.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::decomposition::SeriesDecomposition;
use super::revin::{RevIn, WindowStats};
use super::{family_mismatch, ForecastOutput, Forecaster, ForwardOptions, ModelInputs, ModelKind};
use crate::config::ExpConfig;
use crate::error::{MoleError, Result};

/// Linear map over the last axis, shared across channels or per channel.
#[derive(Debug, Clone)]
pub struct TimeProjection {
    layers: Vec<Linear>,
}

impl TimeProjection {
    /// Create a projection from `in_len` to `out_len` steps.
    pub fn new(
        in_len: usize,
        out_len: usize,
        channels: usize,
        individual: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let layers = if individual {
            (0..channels)
                .map(|c| candle_nn::linear(in_len, out_len, vb.pp(c.to_string())))
                .collect::<candle_core::Result<Vec<_>>>()?
        } else {
            vec![candle_nn::linear(in_len, out_len, vb)?]
        };
        Ok(Self { layers })
    }

    /// `[B, C, in_len] -> [B, C, out_len]`.
    pub fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        if let [layer] = self.layers.as_slice() {
            return layer.forward(x);
        }
        let outputs = self
            .layers
            .iter()
            .enumerate()
            .map(|(c, layer)| layer.forward(&x.narrow(1, c, 1)?.contiguous()?))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Tensor::cat(&outputs, 1)
    }
}

/// Backbone variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneKind {
    /// Trend/seasonal decomposition.
    DLinear,
    /// Reversible normalization plus linear map.
    RLinear,
    /// Reversible normalization plus residual MLP.
    RMlp,
}

#[derive(Debug, Clone)]
enum Layers {
    DLinear {
        decomposition: SeriesDecomposition,
        seasonal: TimeProjection,
        trend: TimeProjection,
    },
    RLinear {
        projection: TimeProjection,
    },
    RMlp {
        hidden: Linear,
        back: Linear,
        projection: TimeProjection,
    },
}

/// Shared linear backbone.
#[derive(Debug, Clone)]
pub struct Backbone {
    layers: Layers,
    revin: Option<RevIn>,
}

impl Backbone {
    /// Build a backbone emitting `out_len` steps per channel.
    pub fn new(
        kind: BackboneKind,
        config: &ExpConfig,
        out_len: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let seq_len = config.forecast.seq_len;
        let channels = config.forecast.enc_in;
        let individual = config.mole.individual;

        let layers = match kind {
            BackboneKind::DLinear => Layers::DLinear {
                decomposition: SeriesDecomposition::default(),
                seasonal: TimeProjection::new(
                    seq_len,
                    out_len,
                    channels,
                    individual,
                    vb.pp("linear_seasonal"),
                )?,
                trend: TimeProjection::new(
                    seq_len,
                    out_len,
                    channels,
                    individual,
                    vb.pp("linear_trend"),
                )?,
            },
            BackboneKind::RLinear => Layers::RLinear {
                projection: TimeProjection::new(
                    seq_len,
                    out_len,
                    channels,
                    individual,
                    vb.pp("projection"),
                )?,
            },
            BackboneKind::RMlp => {
                let d_model = config.transformer.d_model;
                Layers::RMlp {
                    hidden: candle_nn::linear(seq_len, d_model, vb.pp("temporal.0"))?,
                    back: candle_nn::linear(d_model, seq_len, vb.pp("temporal.2"))?,
                    projection: TimeProjection::new(
                        seq_len,
                        out_len,
                        channels,
                        individual,
                        vb.pp("projection"),
                    )?,
                }
            }
        };

        let revin = match kind {
            BackboneKind::RLinear | BackboneKind::RMlp if !config.mole.disable_rev => {
                Some(RevIn::new(channels, vb.pp("rev"))?)
            }
            _ => None,
        };

        Ok(Self { layers, revin })
    }

    /// Map `x [B, L, C]` to `[B, C, out_len]`, plus the statistics needed
    /// to denormalize it.
    pub fn forward(&self, x: &Tensor) -> candle_core::Result<(Tensor, Option<WindowStats>)> {
        let (x, stats) = match &self.revin {
            Some(revin) => {
                let (x, stats) = revin.normalize(x)?;
                (x, Some(stats))
            }
            None => (x.clone(), None),
        };

        let out = match &self.layers {
            Layers::DLinear {
                decomposition,
                seasonal,
                trend,
            } => {
                let (s, t) = decomposition.forward(&x)?;
                let s = seasonal.forward(&s.transpose(1, 2)?.contiguous()?)?;
                let t = trend.forward(&t.transpose(1, 2)?.contiguous()?)?;
                (s + t)?
            }
            Layers::RLinear { projection } => {
                projection.forward(&x.transpose(1, 2)?.contiguous()?)?
            }
            Layers::RMlp {
                hidden,
                back,
                projection,
            } => {
                let xt = x.transpose(1, 2)?.contiguous()?;
                let mixed = back.forward(&hidden.forward(&xt)?.relu()?)?;
                projection.forward(&(xt + mixed)?)?
            }
        };

        Ok((out, stats))
    }

    /// Map a channel-first `[B, C, N]` output back to the input scale.
    pub fn denormalize(
        &self,
        out: &Tensor,
        stats: Option<&WindowStats>,
    ) -> candle_core::Result<Tensor> {
        match (&self.revin, stats) {
            (Some(revin), Some(stats)) => {
                let y = revin.denormalize(&out.transpose(1, 2)?, stats)?;
                y.transpose(1, 2)?.contiguous()
            }
            _ => Ok(out.clone()),
        }
    }
}

/// Non-gated DLinear, RLinear and RMLP baselines.
pub struct LinearForecaster {
    kind: ModelKind,
    backbone: Backbone,
}

impl LinearForecaster {
    /// Create the baseline named by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Model`] if `kind` has no linear backbone.
    pub fn new(config: &ExpConfig, kind: ModelKind, vb: VarBuilder) -> Result<Self> {
        let backbone_kind = kind
            .backbone()
            .ok_or_else(|| MoleError::model(format!("{kind} has no linear backbone")))?;
        let backbone = Backbone::new(backbone_kind, config, config.forecast.pred_len, vb)?;
        Ok(Self { kind, backbone })
    }
}

impl Forecaster for LinearForecaster {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn forward(
        &self,
        inputs: &ModelInputs<'_>,
        _options: &ForwardOptions,
    ) -> Result<ForecastOutput> {
        let ModelInputs::Linear { x } = inputs else {
            return Err(family_mismatch(self.kind, inputs));
        };
        let (out, stats) = self.backbone.forward(x)?;
        let out = self.backbone.denormalize(&out, stats.as_ref())?;
        Ok(ForecastOutput::prediction(out.transpose(1, 2)?.contiguous()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::small_config;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_individual_projection_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let proj = TimeProjection::new(10, 4, 3, true, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (2, 3, 10), &device).unwrap();
        assert_eq!(proj.forward(&x).unwrap().dims(), &[2, 3, 4]);
        // one weight and one bias per channel
        assert_eq!(varmap.all_vars().len(), 6);
    }

    #[test]
    fn test_backbone_output_length() {
        let device = Device::Cpu;
        let config = small_config(ModelKind::MoleRMlp);
        let x = Tensor::randn(0f32, 1.0, (2, 24, 3), &device).unwrap();

        for kind in [BackboneKind::DLinear, BackboneKind::RLinear, BackboneKind::RMlp] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let backbone = Backbone::new(kind, &config, 8 * 3, vb).unwrap();
            let (out, stats) = backbone.forward(&x).unwrap();
            assert_eq!(out.dims(), &[2, 3, 24]);
            assert_eq!(stats.is_some(), kind != BackboneKind::DLinear);
        }
    }

    #[test]
    fn test_disable_rev_skips_normalization() {
        let device = Device::Cpu;
        let mut config = small_config(ModelKind::RLinear);
        config.mole.disable_rev = true;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let backbone = Backbone::new(BackboneKind::RLinear, &config, 8, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 24, 3), &device).unwrap();
        let (_, stats) = backbone.forward(&x).unwrap();
        assert!(stats.is_none());
    }
}
