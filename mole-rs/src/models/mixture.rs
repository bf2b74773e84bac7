//! Mixture of linear experts with timestamp gating.
//!
//! The backbone produces `K` forecasts per channel. A small MLP over the
//! timestamp features of the first input step yields per-channel logits over
//! the heads; their softmax weights mix the heads into one prediction.

use candle_core::{Module, Tensor, D};
use candle_nn::{Dropout, Linear, VarBuilder};

use super::linear::Backbone;
use super::{family_mismatch, ForecastOutput, Forecaster, ForwardOptions, ModelInputs, ModelKind};
use crate::config::ExpConfig;
use crate::error::{MoleError, Result};

/// Gating network: `Linear -> ReLU -> Linear`, then dropout and softmax
/// over heads.
#[derive(Debug, Clone)]
pub struct TemporalGate {
    input: Linear,
    output: Linear,
    dropout: Dropout,
    heads: usize,
    channels: usize,
}

impl TemporalGate {
    /// Create a gate over `mark_dim` timestamp features.
    pub fn new(
        mark_dim: usize,
        heads: usize,
        channels: usize,
        head_dropout: f32,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let width = heads * channels;
        Ok(Self {
            input: candle_nn::linear(mark_dim, width, vb.pp("linear_temporal.0"))?,
            output: candle_nn::linear(width, width, vb.pp("linear_temporal.2"))?,
            dropout: Dropout::new(head_dropout),
            heads,
            channels,
        })
    }

    /// Softmax weights `[B, C, K]` from `x_mark [B, L, T]`.
    pub fn forward(&self, x_mark: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let batch = x_mark.dim(0)?;
        let first = x_mark.narrow(1, 0, 1)?.squeeze(1)?;
        let logits = self.output.forward(&self.input.forward(&first)?.relu()?)?;
        let logits = logits.reshape((batch, self.channels, self.heads))?;
        let logits = self.dropout.forward(&logits, train)?;
        candle_nn::ops::softmax(&logits, D::Minus1)
    }
}

/// MoLE forecaster over a DLinear, RLinear or RMLP backbone.
pub struct MixtureForecaster {
    kind: ModelKind,
    backbone: Backbone,
    gate: TemporalGate,
    heads: usize,
    pred_len: usize,
}

impl MixtureForecaster {
    /// Create the mixture named by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Model`] if `kind` has no linear backbone.
    pub fn new(config: &ExpConfig, kind: ModelKind, mark_dim: usize, vb: VarBuilder) -> Result<Self> {
        let backbone_kind = kind
            .backbone()
            .ok_or_else(|| MoleError::model(format!("{kind} has no linear backbone")))?;
        let heads = config.mole.t_dim;
        let pred_len = config.forecast.pred_len;
        let backbone = Backbone::new(backbone_kind, config, pred_len * heads, vb.clone())?;
        let gate = TemporalGate::new(
            mark_dim,
            heads,
            config.forecast.enc_in,
            config.mole.head_dropout,
            vb,
        )?;
        Ok(Self {
            kind,
            backbone,
            gate,
            heads,
            pred_len,
        })
    }
}

impl Forecaster for MixtureForecaster {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn num_heads(&self) -> usize {
        self.heads
    }

    fn forward(&self, inputs: &ModelInputs<'_>, options: &ForwardOptions) -> Result<ForecastOutput> {
        let ModelInputs::GatedLinear { x, x_mark } = inputs else {
            return Err(family_mismatch(self.kind, inputs));
        };
        let (batch, _, channels) = x.dims3()?;

        let (out, stats) = self.backbone.forward(x)?;
        let out = self.backbone.denormalize(&out, stats.as_ref())?;
        // [B, C, pred_len, K]
        let heads = out.reshape((batch, channels, self.pred_len, self.heads))?;

        let weights = self.gate.forward(x_mark, options.train)?;
        let prediction = heads
            .broadcast_mul(&weights.unsqueeze(2)?)?
            .sum(3)?
            .transpose(1, 2)?
            .contiguous()?;

        Ok(ForecastOutput {
            prediction,
            heads: if options.separate_heads {
                Some(heads.permute((0, 2, 1, 3))?.contiguous()?)
            } else {
                None
            },
            gating: options.gating_weights.then_some(weights),
            attention: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::small_config;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(kind: ModelKind) -> (VarMap, MixtureForecaster) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = MixtureForecaster::new(&small_config(kind), kind, 4, vb).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_gating_weights_sum_to_one() {
        let (_varmap, model) = build(ModelKind::MoleDLinear);
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (2, 24, 3), &device).unwrap();
        let x_mark = Tensor::randn(0f32, 0.3, (2, 24, 4), &device).unwrap();

        let out = model
            .forward(
                &ModelInputs::GatedLinear { x: &x, x_mark: &x_mark },
                &ForwardOptions {
                    gating_weights: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let gating = out.gating.unwrap();
        assert_eq!(gating.dims(), &[2, 3, 3]);

        let sums: Vec<f32> = gating.sum(2).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        assert!(out.heads.is_none());
    }

    #[test]
    fn test_prediction_is_weighted_sum_of_heads() {
        let (_varmap, model) = build(ModelKind::MoleRLinear);
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (2, 24, 3), &device).unwrap();
        let x_mark = Tensor::randn(0f32, 0.3, (2, 24, 4), &device).unwrap();

        let out = model
            .forward(
                &ModelInputs::GatedLinear { x: &x, x_mark: &x_mark },
                &ForwardOptions {
                    separate_heads: true,
                    gating_weights: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let heads = out.heads.unwrap();
        assert_eq!(heads.dims(), &[2, 8, 3, 3]);

        // [B, C, K] -> [B, 1, C, K]
        let weights = out.gating.unwrap().unsqueeze(1).unwrap();
        let mixed = heads.broadcast_mul(&weights).unwrap().sum(3).unwrap();
        let diff: f32 = (mixed - &out.prediction)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-3);
    }

    #[test]
    fn test_head_count() {
        let (_varmap, model) = build(ModelKind::MoleRMlp);
        assert_eq!(model.num_heads(), 3);
    }
}
