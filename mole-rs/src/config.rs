//! Experiment configuration parsing and validation.

use std::fmt;
use std::path::Path;

use forecast_tools::LrAdjust;
use serde::{Deserialize, Serialize};

use crate::error::{MoleError, Result};
use crate::models::{ModelFamily, ModelKind};

/// Main configuration for a forecasting experiment.
///
/// # Example
///
/// ```rust
/// use mole_rs::ExpConfig;
///
/// # fn main() -> mole_rs::Result<()> {
/// let config = ExpConfig::from_preset("etth1-mole-dlinear")?;
/// config.validate()?;
///
/// assert_eq!(config.forecast.pred_len, 96);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpConfig {
    /// Registry name of the forecaster.
    pub model: ModelKind,

    /// Free-form experiment id, first component of the setting string.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Experiment description, appended to the setting string.
    #[serde(default = "default_des")]
    pub des: String,

    /// Number of repeated runs.
    #[serde(default = "default_itr")]
    pub itr: usize,

    /// Random seed for initialization and shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Root directory for checkpoints.
    #[serde(default = "default_checkpoints")]
    pub checkpoints: String,

    /// Root directory for per-setting result arrays.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Text file that test metrics are appended to.
    #[serde(default = "default_result_file")]
    pub result_file: String,

    /// Dataset configuration.
    pub data: DataConfig,

    /// Window lengths and channel counts.
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Mixture-of-experts settings.
    #[serde(default)]
    pub mole: MoleSettings,

    /// Transformer baseline settings.
    #[serde(default)]
    pub transformer: TransformerSettings,

    /// Training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
}

fn default_model_id() -> String {
    "test".into()
}
fn default_des() -> String {
    "Exp".into()
}
fn default_itr() -> usize {
    1
}
fn default_seed() -> u64 {
    2021
}
fn default_checkpoints() -> String {
    "./checkpoints".into()
}
fn default_results_dir() -> String {
    "./results".into()
}
fn default_result_file() -> String {
    "result.txt".into()
}

/// Built-in dataset layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Hourly electricity transformer temperature, set 1.
    #[serde(rename = "ETTh1")]
    Etth1,
    /// Hourly electricity transformer temperature, set 2.
    #[serde(rename = "ETTh2")]
    Etth2,
    /// 15-minute electricity transformer temperature, set 1.
    #[serde(rename = "ETTm1")]
    Ettm1,
    /// 15-minute electricity transformer temperature, set 2.
    #[serde(rename = "ETTm2")]
    Ettm2,
    /// Any CSV with a `date` column, split 70/10/20.
    #[default]
    #[serde(rename = "custom")]
    Custom,
}

impl DataKind {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etth1 => "ETTh1",
            Self::Etth2 => "ETTh2",
            Self::Ettm1 => "ETTm1",
            Self::Ettm2 => "ETTm2",
            Self::Custom => "custom",
        }
    }
}

/// Forecasting task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Features {
    /// Multivariate input, multivariate output.
    #[default]
    M,
    /// Univariate input, univariate output.
    S,
    /// Multivariate input, univariate (target) output.
    MS,
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::M => "M",
            Self::S => "S",
            Self::MS => "MS",
        })
    }
}

/// Timestamp feature encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Embed {
    /// Normalized continuous calendar features.
    #[default]
    #[serde(rename = "timeF")]
    TimeF,
    /// Integer calendar fields.
    #[serde(rename = "fixed")]
    Fixed,
}

impl fmt::Display for Embed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimeF => "timeF",
            Self::Fixed => "fixed",
        })
    }
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Split layout.
    #[serde(default)]
    pub kind: DataKind,

    /// Directory holding the CSV file.
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// CSV file name.
    pub data_path: String,

    /// Forecasting task.
    #[serde(default)]
    pub features: Features,

    /// Target column for `S` and `MS` tasks.
    #[serde(default = "default_target")]
    pub target: String,

    /// Sampling frequency (`s`, `t`, `h`, `d`, `b`, `w`, optionally with a
    /// multiple such as `15min`).
    #[serde(default = "default_freq")]
    pub freq: String,

    /// Timestamp feature encoding.
    #[serde(default)]
    pub embed: Embed,

    /// Standardize values with statistics of the training split.
    #[serde(default = "default_true")]
    pub scale: bool,

    /// Map predictions back to the original scale in `predict`.
    #[serde(default)]
    pub inverse: bool,
}

fn default_root_path() -> String {
    "./dataset".into()
}
fn default_target() -> String {
    "OT".into()
}
fn default_freq() -> String {
    "h".into()
}
fn default_true() -> bool {
    true
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            kind: DataKind::Custom,
            root_path: default_root_path(),
            data_path: String::new(),
            features: Features::M,
            target: default_target(),
            freq: default_freq(),
            embed: Embed::TimeF,
            scale: true,
            inverse: false,
        }
    }
}

/// Window lengths and channel counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Input window length.
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    /// Start-token length shared between input and decoder windows.
    #[serde(default = "default_label_len")]
    pub label_len: usize,
    /// Forecast horizon.
    #[serde(default = "default_pred_len")]
    pub pred_len: usize,
    /// Encoder input channels.
    #[serde(default = "default_channels")]
    pub enc_in: usize,
    /// Decoder input channels.
    #[serde(default = "default_channels")]
    pub dec_in: usize,
    /// Output channels.
    #[serde(default = "default_channels")]
    pub c_out: usize,
}

fn default_seq_len() -> usize {
    336
}
fn default_label_len() -> usize {
    48
}
fn default_pred_len() -> usize {
    96
}
fn default_channels() -> usize {
    7
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            seq_len: default_seq_len(),
            label_len: default_label_len(),
            pred_len: default_pred_len(),
            enc_in: default_channels(),
            dec_in: default_channels(),
            c_out: default_channels(),
        }
    }
}

/// Mixture-of-linear-experts settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoleSettings {
    /// Number of expert heads.
    #[serde(default = "default_t_dim")]
    pub t_dim: usize,
    /// Dropout applied to the gating logits during training.
    #[serde(default)]
    pub head_dropout: f32,
    /// One linear map per channel instead of a shared one.
    #[serde(default)]
    pub individual: bool,
    /// Skip reversible instance normalization in RLinear/RMLP variants.
    #[serde(default)]
    pub disable_rev: bool,
    /// Write test-time gating weights to this `.npy` path.
    #[serde(default)]
    pub save_gating_weights: Option<String>,
}

fn default_t_dim() -> usize {
    4
}

impl Default for MoleSettings {
    fn default() -> Self {
        Self {
            t_dim: default_t_dim(),
            head_dropout: 0.0,
            individual: false,
            disable_rev: false,
            save_gating_weights: None,
        }
    }
}

/// Feed-forward activation of the transformer baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Gaussian error linear unit.
    #[default]
    Gelu,
    /// Rectified linear unit.
    Relu,
}

/// Transformer baseline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerSettings {
    /// Model dimension.
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    /// Attention heads.
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,
    /// Encoder layers.
    #[serde(default = "default_e_layers")]
    pub e_layers: usize,
    /// Decoder layers.
    #[serde(default = "default_d_layers")]
    pub d_layers: usize,
    /// Feed-forward dimension.
    #[serde(default = "default_d_ff")]
    pub d_ff: usize,
    /// Dropout probability.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Feed-forward activation.
    #[serde(default)]
    pub activation: Activation,
    /// Return attention maps alongside predictions.
    #[serde(default)]
    pub output_attention: bool,
}

fn default_d_model() -> usize {
    512
}
fn default_n_heads() -> usize {
    8
}
fn default_e_layers() -> usize {
    2
}
fn default_d_layers() -> usize {
    1
}
fn default_d_ff() -> usize {
    2048
}
fn default_dropout() -> f32 {
    0.05
}

impl Default for TransformerSettings {
    fn default() -> Self {
        Self {
            d_model: default_d_model(),
            n_heads: default_n_heads(),
            e_layers: default_e_layers(),
            d_layers: default_d_layers(),
            d_ff: default_d_ff(),
            dropout: default_dropout(),
            activation: Activation::Gelu,
            output_attention: false,
        }
    }
}

/// Training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of epochs.
    #[serde(default = "default_epochs")]
    pub train_epochs: usize,
    /// Windows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Early stopping patience in epochs.
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Minimum validation loss decrease counted as improvement.
    #[serde(default)]
    pub min_delta: f32,
    /// Adam learning rate.
    #[serde(default = "default_lr")]
    pub learning_rate: f64,
    /// Epoch learning rate schedule.
    #[serde(default)]
    pub lradj: LrAdjust,
    /// Train on CUDA when available.
    #[serde(default)]
    pub use_gpu: bool,
    /// CUDA device ordinal.
    #[serde(default)]
    pub gpu: usize,
    /// Save prediction, truth and input arrays during test.
    #[serde(default)]
    pub save_arrays: bool,
    /// Log training loss every N iterations.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
}

fn default_epochs() -> usize {
    10
}
fn default_batch_size() -> usize {
    32
}
fn default_patience() -> usize {
    3
}
fn default_lr() -> f64 {
    1e-4
}
fn default_log_interval() -> usize {
    100
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_epochs: default_epochs(),
            batch_size: default_batch_size(),
            patience: default_patience(),
            min_delta: 0.0,
            learning_rate: default_lr(),
            lradj: LrAdjust::Type1,
            use_gpu: false,
            gpu: 0,
            save_arrays: false,
            log_interval: default_log_interval(),
        }
    }
}

/// Command-line overrides applied on top of a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replace `model`.
    pub model: Option<ModelKind>,
    /// Replace `forecast.seq_len`.
    pub seq_len: Option<usize>,
    /// Replace `forecast.pred_len`.
    pub pred_len: Option<usize>,
    /// Replace `training.train_epochs`.
    pub train_epochs: Option<usize>,
    /// Replace `training.learning_rate`.
    pub learning_rate: Option<f64>,
    /// Replace `training.batch_size`.
    pub batch_size: Option<usize>,
}

impl ExpConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a configuration from a preset.
    ///
    /// Available presets:
    /// - `"etth1-mole-dlinear"` - MoLE-DLinear on ETTh1, horizon 96
    /// - `"etth1-mole-rlinear"` - MoLE-RLinear on ETTh1, horizon 96
    /// - `"weather-mole-rmlp"` - MoLE-RMLP on the 21-channel weather set
    /// - `"etth1-transformer"` - vanilla Transformer on ETTh1
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Config`] for unknown presets.
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "etth1-mole-dlinear" => Ok(Self::etth1_preset(ModelKind::MoleDLinear)),
            "etth1-mole-rlinear" => Ok(Self::etth1_preset(ModelKind::MoleRLinear)),
            "weather-mole-rmlp" => Ok(Self::weather_rmlp_preset()),
            "etth1-transformer" => Ok(Self::etth1_transformer_preset()),
            _ => Err(MoleError::Config(format!("Unknown preset: {preset}"))),
        }
    }

    /// ETTh1 configuration for a linear-family model.
    #[must_use]
    pub fn etth1_preset(model: ModelKind) -> Self {
        Self {
            model,
            model_id: "ETTh1_336_96".into(),
            des: default_des(),
            itr: 1,
            seed: default_seed(),
            checkpoints: default_checkpoints(),
            results_dir: default_results_dir(),
            result_file: default_result_file(),
            data: DataConfig {
                kind: DataKind::Etth1,
                data_path: "ETTh1.csv".into(),
                ..Default::default()
            },
            forecast: ForecastConfig::default(),
            mole: MoleSettings {
                head_dropout: 0.2,
                ..Default::default()
            },
            transformer: TransformerSettings::default(),
            training: TrainingConfig {
                learning_rate: 5e-3,
                patience: 10,
                train_epochs: 100,
                ..Default::default()
            },
        }
    }

    /// Weather configuration for MoLE-RMLP.
    #[must_use]
    pub fn weather_rmlp_preset() -> Self {
        let mut config = Self::etth1_preset(ModelKind::MoleRMlp);
        config.model_id = "weather_336_96".into();
        config.data = DataConfig {
            kind: DataKind::Custom,
            data_path: "weather.csv".into(),
            freq: "10min".into(),
            ..Default::default()
        };
        config.forecast.enc_in = 21;
        config.forecast.dec_in = 21;
        config.forecast.c_out = 21;
        config.training.learning_rate = 1e-3;
        config
    }

    /// ETTh1 configuration for the Transformer baseline.
    #[must_use]
    pub fn etth1_transformer_preset() -> Self {
        let mut config = Self::etth1_preset(ModelKind::Transformer);
        config.model_id = "ETTh1_96_96".into();
        config.forecast.seq_len = 96;
        config.training.learning_rate = 1e-4;
        config.training.train_epochs = 10;
        config.training.patience = 3;
        config
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(seq_len) = overrides.seq_len {
            self.forecast.seq_len = seq_len;
        }
        if let Some(pred_len) = overrides.pred_len {
            self.forecast.pred_len = pred_len;
        }
        if let Some(epochs) = overrides.train_epochs {
            self.training.train_epochs = epochs;
        }
        if let Some(lr) = overrides.learning_rate {
            self.training.learning_rate = lr;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.training.batch_size = batch_size;
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Config`] describing the first violated rule.
    ///
    /// ```rust
    /// use mole_rs::ExpConfig;
    ///
    /// let mut config = ExpConfig::from_preset("etth1-mole-rlinear").unwrap();
    /// config.forecast.label_len = config.forecast.seq_len + 1;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        let f = &self.forecast;
        if f.seq_len == 0 || f.pred_len == 0 {
            return Err(MoleError::config("seq_len and pred_len must be > 0"));
        }
        if f.label_len > f.seq_len {
            return Err(MoleError::config(format!(
                "label_len ({}) cannot exceed seq_len ({})",
                f.label_len, f.seq_len
            )));
        }
        if f.enc_in == 0 || f.dec_in == 0 || f.c_out == 0 {
            return Err(MoleError::config("channel counts must be > 0"));
        }
        if self.data.features == Features::S && f.enc_in != 1 {
            return Err(MoleError::config(
                "features S is univariate and requires enc_in = 1",
            ));
        }
        if self.data.data_path.is_empty() {
            return Err(MoleError::config("data.data_path is required"));
        }

        let t = &self.training;
        if t.batch_size == 0 {
            return Err(MoleError::config("training.batch_size must be > 0"));
        }
        if t.train_epochs == 0 {
            return Err(MoleError::config("training.train_epochs must be > 0"));
        }
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            return Err(MoleError::config(format!(
                "training.learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if t.log_interval == 0 {
            return Err(MoleError::config("training.log_interval must be > 0"));
        }
        if self.itr == 0 {
            return Err(MoleError::config("itr must be > 0"));
        }

        crate::timefeatures::Frequency::parse(&self.data.freq)?;

        match self.model.family() {
            ModelFamily::GatedLinear => {
                if self.mole.t_dim == 0 {
                    return Err(MoleError::config("mole.t_dim must be > 0"));
                }
                if !(0.0..1.0).contains(&self.mole.head_dropout) {
                    return Err(MoleError::config("mole.head_dropout must be in [0, 1)"));
                }
            }
            ModelFamily::Linear => {}
            ModelFamily::Attention => {
                let tr = &self.transformer;
                if tr.n_heads == 0 || tr.d_model % tr.n_heads != 0 {
                    return Err(MoleError::config(format!(
                        "transformer.d_model ({}) must be divisible by n_heads ({})",
                        tr.d_model, tr.n_heads
                    )));
                }
                if tr.e_layers == 0 || tr.d_layers == 0 {
                    return Err(MoleError::config(
                        "transformer needs at least one encoder and decoder layer",
                    ));
                }
                if !(0.0..1.0).contains(&tr.dropout) {
                    return Err(MoleError::config("transformer.dropout must be in [0, 1)"));
                }
            }
        }

        Ok(())
    }

    /// Setting string identifying the checkpoint and result directories of
    /// one run.
    ///
    /// ```rust
    /// use mole_rs::ExpConfig;
    ///
    /// let config = ExpConfig::from_preset("etth1-mole-dlinear").unwrap();
    /// assert_eq!(
    ///     config.setting(0),
    ///     "ETTh1_336_96_MoLE_DLinear_ETTh1_ftM_sl336_ll48_pl96_dm512_nh8_el2_dl1_df2048_ebtimeF_Exp_0"
    /// );
    /// ```
    pub fn setting(&self, iteration: usize) -> String {
        format!(
            "{}_{}_{}_ft{}_sl{}_ll{}_pl{}_dm{}_nh{}_el{}_dl{}_df{}_eb{}_{}_{}",
            self.model_id,
            self.model,
            self.data.kind.as_str(),
            self.data.features,
            self.forecast.seq_len,
            self.forecast.label_len,
            self.forecast.pred_len,
            self.transformer.d_model,
            self.transformer.n_heads,
            self.transformer.e_layers,
            self.transformer.d_layers,
            self.transformer.d_ff,
            self.data.embed,
            self.des,
            iteration
        )
    }

    /// Index of the first channel kept for loss and metrics.
    pub fn f_dim(&self, channels: usize) -> usize {
        match self.data.features {
            Features::MS => channels.saturating_sub(1),
            Features::M | Features::S => 0,
        }
    }
}
