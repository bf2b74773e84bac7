//! Model registry and forecaster implementations.
//!
//! Every model is selected by its registry name ([`ModelKind`]) and belongs
//! to one [`ModelFamily`], which fixes the argument set of its forward pass:
//!
//! | Family | Inputs |
//! |--------|--------|
//! | [`ModelFamily::GatedLinear`] | `x`, `x_mark` |
//! | [`ModelFamily::Linear`] | `x` |
//! | [`ModelFamily::Attention`] | `x`, `x_mark`, `dec_inp`, `y_mark` |

pub mod decomposition;
pub mod linear;
pub mod mixture;
pub mod revin;
pub mod transformer;

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::config::ExpConfig;
use crate::error::{MoleError, Result};

pub use linear::{Backbone, BackboneKind, LinearForecaster};
pub use mixture::{MixtureForecaster, TemporalGate};
pub use transformer::TransformerForecaster;

/// Registry name of a forecaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Mixture of DLinear heads.
    #[serde(rename = "MoLE_DLinear")]
    MoleDLinear,
    /// Mixture of RLinear heads.
    #[serde(rename = "MoLE_RLinear")]
    MoleRLinear,
    /// Mixture of RMLP heads.
    #[serde(rename = "MoLE_RMLP")]
    MoleRMlp,
    /// Decomposition linear baseline.
    #[serde(rename = "DLinear")]
    DLinear,
    /// Reversible-normalized linear baseline.
    #[serde(rename = "RLinear")]
    RLinear,
    /// Reversible-normalized MLP baseline.
    #[serde(rename = "RMLP")]
    RMlp,
    /// Vanilla encoder-decoder transformer.
    #[serde(rename = "Transformer")]
    Transformer,
}

impl ModelKind {
    /// All registered models.
    pub const ALL: [ModelKind; 7] = [
        Self::MoleDLinear,
        Self::MoleRLinear,
        Self::MoleRMlp,
        Self::DLinear,
        Self::RLinear,
        Self::RMlp,
        Self::Transformer,
    ];

    /// Registry name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoleDLinear => "MoLE_DLinear",
            Self::MoleRLinear => "MoLE_RLinear",
            Self::MoleRMlp => "MoLE_RMLP",
            Self::DLinear => "DLinear",
            Self::RLinear => "RLinear",
            Self::RMlp => "RMLP",
            Self::Transformer => "Transformer",
        }
    }

    /// Architecture family, which decides the forward arguments.
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::MoleDLinear | Self::MoleRLinear | Self::MoleRMlp => ModelFamily::GatedLinear,
            Self::DLinear | Self::RLinear | Self::RMlp => ModelFamily::Linear,
            Self::Transformer => ModelFamily::Attention,
        }
    }

    /// Per-head backbone of the linear families.
    pub fn backbone(&self) -> Option<BackboneKind> {
        match self {
            Self::MoleDLinear | Self::DLinear => Some(BackboneKind::DLinear),
            Self::MoleRLinear | Self::RLinear => Some(BackboneKind::RLinear),
            Self::MoleRMlp | Self::RMlp => Some(BackboneKind::RMlp),
            Self::Transformer => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = MoleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(ModelKind::as_str).collect();
                MoleError::config(format!(
                    "unknown model '{s}' (known: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Architecture family of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Linear experts mixed by timestamp gating.
    GatedLinear,
    /// Plain linear or MLP maps over the time axis.
    Linear,
    /// Encoder-decoder attention.
    Attention,
}

/// Forward-pass arguments, one variant per [`ModelFamily`].
#[derive(Debug, Clone, Copy)]
pub enum ModelInputs<'a> {
    /// `x [B, seq_len, C]`, `x_mark [B, seq_len, T]`.
    GatedLinear {
        /// Input window.
        x: &'a Tensor,
        /// Input timestamp features.
        x_mark: &'a Tensor,
    },
    /// `x [B, seq_len, C]`.
    Linear {
        /// Input window.
        x: &'a Tensor,
    },
    /// Encoder window, decoder start tokens plus zero horizon, and both
    /// timestamp feature sets.
    Attention {
        /// Input window.
        x: &'a Tensor,
        /// Input timestamp features.
        x_mark: &'a Tensor,
        /// Decoder input `[B, label_len + pred_len, C]`.
        dec_inp: &'a Tensor,
        /// Decoder timestamp features.
        y_mark: &'a Tensor,
    },
}

impl ModelInputs<'_> {
    /// Family this argument set belongs to.
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::GatedLinear { .. } => ModelFamily::GatedLinear,
            Self::Linear { .. } => ModelFamily::Linear,
            Self::Attention { .. } => ModelFamily::Attention,
        }
    }
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardOptions {
    /// Enable dropout.
    pub train: bool,
    /// Also return every expert head.
    pub separate_heads: bool,
    /// Also return the gating weights.
    pub gating_weights: bool,
}

impl ForwardOptions {
    /// Options for an optimization step.
    pub fn train() -> Self {
        Self {
            train: true,
            ..Default::default()
        }
    }

    /// Options for evaluation.
    pub fn eval() -> Self {
        Self::default()
    }
}

/// Result of a forward pass.
#[derive(Debug, Clone)]
pub struct ForecastOutput {
    /// `[B, pred_len, C]`.
    pub prediction: Tensor,
    /// Individual expert heads `[B, pred_len, C, K]`.
    pub heads: Option<Tensor>,
    /// Softmax gating weights `[B, C, K]`.
    pub gating: Option<Tensor>,
    /// Attention maps per layer.
    pub attention: Option<Vec<Tensor>>,
}

impl ForecastOutput {
    /// Output carrying only a prediction.
    pub fn prediction(prediction: Tensor) -> Self {
        Self {
            prediction,
            heads: None,
            gating: None,
            attention: None,
        }
    }
}

/// A constructible forecaster.
pub trait Forecaster {
    /// Registry name.
    fn kind(&self) -> ModelKind;

    /// Architecture family.
    fn family(&self) -> ModelFamily {
        self.kind().family()
    }

    /// Number of expert heads (1 for non-mixture models).
    fn num_heads(&self) -> usize {
        1
    }

    /// Run the model.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Model`] if `inputs` belong to another family, or
    /// a candle error on shape mismatches.
    fn forward(&self, inputs: &ModelInputs<'_>, options: &ForwardOptions)
        -> Result<ForecastOutput>;
}

pub(crate) fn family_mismatch(kind: ModelKind, inputs: &ModelInputs<'_>) -> MoleError {
    MoleError::model(format!(
        "{kind} expects {:?} inputs, got {:?}",
        kind.family(),
        inputs.family()
    ))
}

/// Construct the forecaster named by `config.model`.
///
/// `mark_dim` is the number of timestamp features per row.
///
/// # Errors
///
/// Returns an error if parameter creation fails.
pub fn build_model(
    config: &ExpConfig,
    mark_dim: usize,
    vb: VarBuilder,
) -> Result<Box<dyn Forecaster>> {
    let kind = config.model;
    let model: Box<dyn Forecaster> = match kind.family() {
        ModelFamily::GatedLinear => {
            Box::new(MixtureForecaster::new(config, kind, mark_dim, vb)?)
        }
        ModelFamily::Linear => Box::new(LinearForecaster::new(config, kind, vb)?),
        ModelFamily::Attention => Box::new(TransformerForecaster::new(config, mark_dim, vb)?),
    };
    tracing::info!("Built {} ({:?} family)", kind, kind.family());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    pub(crate) fn small_config(kind: ModelKind) -> ExpConfig {
        let mut config = ExpConfig::etth1_preset(kind);
        config.forecast.seq_len = 24;
        config.forecast.label_len = 12;
        config.forecast.pred_len = 8;
        config.forecast.enc_in = 3;
        config.forecast.dec_in = 3;
        config.forecast.c_out = 3;
        config.mole.t_dim = 3;
        config.transformer.d_model = 16;
        config.transformer.n_heads = 4;
        config.transformer.d_ff = 32;
        config
    }

    #[test]
    fn test_registry_names() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
        assert!("Informer".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::MoleRMlp.to_string(), "MoLE_RMLP");
    }

    #[test]
    fn test_families() {
        assert_eq!(ModelKind::MoleDLinear.family(), ModelFamily::GatedLinear);
        assert_eq!(ModelKind::RLinear.family(), ModelFamily::Linear);
        assert_eq!(ModelKind::Transformer.family(), ModelFamily::Attention);
        assert!(ModelKind::Transformer.backbone().is_none());
    }

    #[test]
    fn test_build_every_model() {
        let device = Device::Cpu;
        let b = 2;
        let x = Tensor::randn(0f32, 1.0, (b, 24, 3), &device).unwrap();
        let x_mark = Tensor::zeros((b, 24, 4), DType::F32, &device).unwrap();
        let dec_inp = Tensor::zeros((b, 20, 3), DType::F32, &device).unwrap();
        let y_mark = Tensor::zeros((b, 20, 4), DType::F32, &device).unwrap();

        for kind in ModelKind::ALL {
            let config = small_config(kind);
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let model = build_model(&config, 4, vb).unwrap();
            assert_eq!(model.kind(), kind);

            let inputs = match kind.family() {
                ModelFamily::GatedLinear => ModelInputs::GatedLinear { x: &x, x_mark: &x_mark },
                ModelFamily::Linear => ModelInputs::Linear { x: &x },
                ModelFamily::Attention => ModelInputs::Attention {
                    x: &x,
                    x_mark: &x_mark,
                    dec_inp: &dec_inp,
                    y_mark: &y_mark,
                },
            };
            let out = model.forward(&inputs, &ForwardOptions::eval()).unwrap();
            assert_eq!(out.prediction.dims(), &[b, 8, 3], "{kind}");
        }
    }

    #[test]
    fn test_wrong_family_is_rejected() {
        let device = Device::Cpu;
        let config = small_config(ModelKind::DLinear);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = build_model(&config, 4, vb).unwrap();

        let x = Tensor::zeros((1, 24, 3), DType::F32, &device).unwrap();
        let x_mark = Tensor::zeros((1, 24, 4), DType::F32, &device).unwrap();
        let err = model
            .forward(
                &ModelInputs::GatedLinear { x: &x, x_mark: &x_mark },
                &ForwardOptions::eval(),
            )
            .unwrap_err();
        assert!(matches!(err, MoleError::Model(_)));
    }
}
