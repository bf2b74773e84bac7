//! Experiment orchestration: train, validate, test and predict.
//!
//! [`Exp`] owns the device, the variables and the forecaster built from an
//! [`ExpConfig`]. Every pass over a split runs the same steps:
//!
//! 1. build the decoder input from the start-token slice of `y` and a zero
//!    horizon
//! 2. call the model with the argument set of its [`ModelFamily`]
//! 3. keep the last `pred_len` steps and the channels from `f_dim` on, for
//!    both the output and the target
//!
//! # Example
//!
//! ```no_run
//! use mole_rs::exp::{Exp, TestOptions};
//! use mole_rs::ExpConfig;
//!
//! # fn main() -> mole_rs::Result<()> {
//! let config = ExpConfig::from_preset("etth1-mole-dlinear")?;
//! let setting = config.setting(0);
//!
//! let mut exp = Exp::new(config)?;
//! let report = exp.train(&setting)?;
//! println!("best epoch: {}", report.best_epoch);
//!
//! let test = exp.test(&setting, &TestOptions::default())?;
//! println!("{}", test.metrics);
//! # Ok(())
//! # }
//! ```

use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use forecast_tools::{
    metric, EarlyStopping, EpochScheduler, LrAdjust, Metrics, StepScheduler, StoppingDecision,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint::{Checkpoint, TrainingState};
use crate::config::{ExpConfig, TrainingConfig};
use crate::data::{data_provider, Batch, DataLoader, Split};
use crate::error::{MoleError, Result};
use crate::models::{build_model, ForecastOutput, Forecaster, ForwardOptions, ModelFamily, ModelInputs};
use crate::optimizer::AdamConfig;
use crate::results::{self, ResultsDir};
use crate::timefeatures::{self, Frequency};

/// How expert heads are evaluated in [`Exp::test`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeadMode {
    /// Evaluate the gated mixture.
    #[default]
    Mixture,
    /// Evaluate every head and report the best one.
    Separate,
    /// Evaluate head `k` alone.
    Fixed(usize),
}

/// Options of [`Exp::test`].
#[derive(Debug, Clone, Copy)]
pub struct TestOptions {
    /// Split to evaluate.
    pub flag: Split,
    /// Load the saved checkpoint of the setting first.
    pub load: bool,
    /// Head evaluation mode.
    pub head: HeadMode,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            flag: Split::Test,
            load: false,
            head: HeadMode::Mixture,
        }
    }
}

/// Outcome of a test pass.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// Metrics of the evaluated (or selected) forecast.
    pub metrics: Metrics,
    /// Index of the lowest-metric head in [`HeadMode::Separate`].
    pub best_head: Option<usize>,
    /// Metrics of every head in [`HeadMode::Separate`].
    pub head_metrics: Vec<Metrics>,
    /// Number of evaluated windows.
    pub windows: usize,
}

/// Losses of one training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    /// 1-based epoch.
    pub epoch: usize,
    /// Mean training batch loss.
    pub train_loss: f32,
    /// Mean validation batch loss.
    pub vali_loss: f32,
    /// Mean test batch loss.
    pub test_loss: f32,
    /// Learning rate used during the epoch.
    pub learning_rate: f64,
}

/// Outcome of [`Exp::train`].
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Per-epoch losses.
    pub epochs: Vec<EpochSummary>,
    /// Epoch of the restored weights.
    pub best_epoch: usize,
    /// Validation loss of the restored weights.
    pub best_val_loss: f32,
    /// Whether patience ran out before `train_epochs`.
    pub stopped_early: bool,
}

/// A forecasting experiment.
pub struct Exp {
    config: ExpConfig,
    device: Device,
    varmap: VarMap,
    model: Box<dyn Forecaster>,
    mark_dim: usize,
}

impl Exp {
    /// Validate `config`, pick the device and build the model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the model cannot
    /// be built.
    pub fn new(config: ExpConfig) -> Result<Self> {
        config.validate()?;
        let device = select_device(&config.training)?;
        if !device.is_cpu() {
            device.set_seed(config.seed)?;
        }

        let freq = Frequency::parse(&config.data.freq)?;
        let mark_dim = timefeatures::feature_count(&freq, config.data.embed);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = build_model(&config, mark_dim, vb)?;

        let params: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        tracing::info!("{} with {} parameters", config.model, params);

        Ok(Self {
            config,
            device,
            varmap,
            model,
            mark_dim,
        })
    }

    /// Experiment configuration.
    pub fn config(&self) -> &ExpConfig {
        &self.config
    }

    /// Compute device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Model variables.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// The forecaster.
    pub fn model(&self) -> &dyn Forecaster {
        self.model.as_ref()
    }

    /// Timestamp features per row.
    pub fn mark_dim(&self) -> usize {
        self.mark_dim
    }

    fn checkpoint(&self, setting: &str) -> Checkpoint {
        Checkpoint::new(&self.config.checkpoints, setting)
    }

    /// Restore the saved weights of `setting`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Checkpoint`] if no matching checkpoint exists.
    pub fn load_checkpoint(&mut self, setting: &str) -> Result<Option<TrainingState>> {
        let ckpt = self.checkpoint(setting);
        ckpt.load(&mut self.varmap)
    }

    /// Run the model on one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn forward_batch(&self, batch: &Batch, options: &ForwardOptions) -> Result<ForecastOutput> {
        let f = &self.config.forecast;
        match self.model.family() {
            ModelFamily::GatedLinear => self.model.forward(
                &ModelInputs::GatedLinear {
                    x: &batch.x,
                    x_mark: &batch.x_mark,
                },
                options,
            ),
            ModelFamily::Linear => self.model.forward(&ModelInputs::Linear { x: &batch.x }, options),
            ModelFamily::Attention => {
                let dec_inp = decoder_input(&batch.y, f.label_len, f.pred_len)?;
                self.model.forward(
                    &ModelInputs::Attention {
                        x: &batch.x,
                        x_mark: &batch.x_mark,
                        dec_inp: &dec_inp,
                        y_mark: &batch.y_mark,
                    },
                    options,
                )
            }
        }
    }

    /// Keep the horizon and the evaluated channels of `t [B, L, C, ...]`.
    fn horizon(&self, t: &Tensor) -> Result<Tensor> {
        let pred_len = self.config.forecast.pred_len;
        let len = t.dim(1)?;
        let channels = t.dim(2)?;
        let f_dim = self.config.f_dim(channels);
        if len < pred_len {
            return Err(MoleError::model(format!(
                "output has {len} steps, fewer than pred_len {pred_len}"
            )));
        }
        Ok(t.narrow(1, len - pred_len, pred_len)?
            .narrow(2, f_dim, channels - f_dim)?)
    }

    /// Train on the train split, validating every epoch, and restore the best
    /// checkpoint at the end.
    ///
    /// # Errors
    ///
    /// Returns an error if a split cannot be loaded or a training step fails.
    pub fn train(&mut self, setting: &str) -> Result<TrainReport> {
        let mut train_loader = data_provider(&self.config, Split::Train)?;
        let mut vali_loader = data_provider(&self.config, Split::Val)?;
        let mut test_loader = data_provider(&self.config, Split::Test)?;

        let train_steps = train_loader.len();
        if train_steps == 0 {
            return Err(MoleError::training(format!(
                "train split has {} windows, fewer than one batch of {}",
                train_loader.dataset().len(),
                self.config.training.batch_size
            )));
        }

        let ckpt = self.checkpoint(setting);
        ckpt.create_dir()?;

        let training = self.config.training.clone();
        let mut early_stopping = EarlyStopping::new(training.patience, training.min_delta);
        let mut optimizer = AdamConfig::with_learning_rate(training.learning_rate).build(&self.varmap)?;
        let scheduler = StepScheduler::try_new(training.lradj, training.learning_rate)?;
        tracing::info!(
            "Training {} for up to {} epochs ({} steps/epoch, lr={}, lradj={})",
            setting,
            training.train_epochs,
            train_steps,
            training.learning_rate,
            scheduler.name()
        );

        let mut epochs = Vec::with_capacity(training.train_epochs);
        let mut stopped_early = false;
        let mut time_now = Instant::now();

        for epoch in 1..=training.train_epochs {
            let epoch_time = Instant::now();
            let learning_rate = optimizer.learning_rate();
            let mut iter_count = 0usize;
            let mut train_loss = Vec::with_capacity(train_steps);

            let pb = ProgressBar::new(train_steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );

            for (i, batch) in train_loader.iter(&self.device).enumerate() {
                let batch = batch?;
                iter_count += 1;

                let out = self.forward_batch(&batch, &ForwardOptions::train())?;
                let pred = self.horizon(&out.prediction)?;
                let target = self.horizon(&batch.y)?;
                let loss = candle_nn::loss::mse(&pred, &target)?;
                let loss_value = loss.to_scalar::<f32>()?;
                train_loss.push(loss_value);

                if (i + 1) % training.log_interval == 0 {
                    tracing::info!("\titers: {}, epoch: {} | loss: {:.7}", i + 1, epoch, loss_value);
                    let speed = time_now.elapsed().as_secs_f64() / iter_count as f64;
                    let left_steps = (training.train_epochs + 1 - epoch) * train_steps - i;
                    let left_time = speed * left_steps as f64;
                    tracing::info!("\tspeed: {:.4}s/iter; left time: {:.4}s", speed, left_time);
                    iter_count = 0;
                    time_now = Instant::now();
                }

                optimizer.step(&loss)?;
                pb.set_message(format!("{loss_value:.4}"));
                pb.inc(1);
            }
            pb.finish_and_clear();

            tracing::info!(
                "Epoch: {} cost time: {:.3}s",
                epoch,
                epoch_time.elapsed().as_secs_f64()
            );
            let train_loss = average(&train_loss);
            let vali_loss = self.vali(&mut vali_loader)?;
            let test_loss = self.vali(&mut test_loader)?;
            tracing::info!(
                "Epoch: {}, Steps: {} | Train Loss: {:.7} Vali Loss: {:.7} Test Loss: {:.7}",
                epoch,
                train_steps,
                train_loss,
                vali_loss,
                test_loss
            );
            epochs.push(EpochSummary {
                epoch,
                train_loss,
                vali_loss,
                test_loss,
                learning_rate,
            });

            match early_stopping.check(vali_loss, epoch) {
                StoppingDecision::NewBest => {
                    let state = TrainingState {
                        epoch,
                        best_val_loss: vali_loss,
                        learning_rate,
                    };
                    ckpt.save(&self.varmap, &state, &self.config)?;
                }
                StoppingDecision::Stop => {
                    tracing::info!("Early stopping");
                    stopped_early = true;
                    break;
                }
                StoppingDecision::NoImprovement { .. } => {}
            }

            if training.lradj != LrAdjust::Tst {
                if let Some(lr) = scheduler.lr_for_epoch(epoch) {
                    optimizer.set_learning_rate(lr);
                    tracing::info!("Updating learning rate to {}", lr);
                }
            }
        }

        if early_stopping.best_epoch() > 0 {
            ckpt.load(&mut self.varmap)?;
        } else {
            tracing::warn!(
                "No epoch improved the validation loss; keeping the final weights"
            );
        }

        Ok(TrainReport {
            epochs,
            best_epoch: early_stopping.best_epoch(),
            best_val_loss: early_stopping.best_value(),
            stopped_early,
        })
    }

    /// Mean batch MSE over `loader` with dropout disabled.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Data`] if the loader yields no batch.
    pub fn vali(&self, loader: &mut DataLoader) -> Result<f32> {
        if loader.is_empty() {
            return Err(MoleError::data(format!(
                "{} split has {} windows, fewer than one batch of {}",
                loader.dataset().split(),
                loader.dataset().len(),
                self.config.training.batch_size
            )));
        }
        let mut total_loss = Vec::with_capacity(loader.len());
        for batch in loader.iter(&self.device) {
            let batch = batch?;
            let out = self.forward_batch(&batch, &ForwardOptions::eval())?;
            let pred = self.horizon(&out.prediction)?.detach();
            let target = self.horizon(&batch.y)?;
            let loss = candle_nn::loss::mse(&pred, &target)?;
            total_loss.push(loss.to_scalar::<f32>()?);
        }
        Ok(average(&total_loss))
    }

    /// Evaluate a split, append its metrics to the result file and
    /// optionally persist arrays and gating weights.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Data`] for [`Split::Pred`], which has no targets.
    /// Also fails if the head mode does not fit the model or writing results
    /// fails.
    pub fn test(&mut self, setting: &str, options: &TestOptions) -> Result<TestReport> {
        if options.flag == Split::Pred {
            // prediction windows have no future targets to score against
            return Err(MoleError::data(
                "the pred split has no targets; use predict instead",
            ));
        }
        let mut loader = data_provider(&self.config, options.flag)?;
        if options.load {
            tracing::info!("loading model");
            self.load_checkpoint(setting)?;
        }

        let num_heads = self.model.num_heads();
        let per_head = match options.head {
            HeadMode::Mixture => false,
            HeadMode::Separate | HeadMode::Fixed(_) => {
                if self.model.family() != ModelFamily::GatedLinear {
                    return Err(MoleError::model(format!(
                        "{} has no expert heads to evaluate",
                        self.config.model
                    )));
                }
                true
            }
        };
        if let HeadMode::Fixed(k) = options.head {
            if k >= num_heads {
                return Err(MoleError::model(format!(
                    "head {k} out of range for {num_heads} heads"
                )));
            }
        }
        let save_gating = self.config.mole.save_gating_weights.is_some()
            && self.model.family() == ModelFamily::GatedLinear;
        let save_arrays = self.config.training.save_arrays;

        let forward = ForwardOptions {
            train: false,
            separate_heads: per_head,
            gating_weights: save_gating,
        };

        let mut preds = Vec::new();
        let mut trues = Vec::new();
        let mut inputs = Vec::new();
        let mut gating = Vec::new();
        let mut windows = 0usize;
        let mut channels = 0usize;

        for batch in loader.iter(&self.device) {
            let batch = batch?;
            let out = self.forward_batch(&batch, &forward)?;

            let target = self.horizon(&batch.y)?;
            let pred = if per_head {
                let heads = out
                    .heads
                    .as_ref()
                    .ok_or_else(|| MoleError::model("model returned no separate heads"))?;
                self.horizon(heads)?
            } else {
                self.horizon(&out.prediction)?
            };

            windows += batch.batch_size();
            channels = target.dim(2)?;
            preds.extend(pred.flatten_all()?.to_vec1::<f32>()?);
            trues.extend(target.flatten_all()?.to_vec1::<f32>()?);
            if save_arrays {
                inputs.extend(batch.x.flatten_all()?.to_vec1::<f32>()?);
            }
            if let Some(weights) = out.gating {
                gating.push(weights.to_device(&Device::Cpu)?);
            }
        }

        let pred_len = self.config.forecast.pred_len;
        let shape = (windows, pred_len, channels);
        let mut head_metrics = Vec::new();
        let mut best_head = None;
        let metrics = match options.head {
            HeadMode::Mixture => metric(&preds, &trues, shape)?,
            HeadMode::Fixed(k) => metric(&select_head(&preds, k, num_heads), &trues, shape)?,
            HeadMode::Separate => {
                let mut lowest: Option<(usize, Metrics)> = None;
                for k in 0..num_heads {
                    let m = metric(&select_head(&preds, k, num_heads), &trues, shape)?;
                    tracing::debug!("head {}: {}", k, m);
                    head_metrics.push(m);
                    if lowest.as_ref().map_or(true, |(_, best)| *best > m) {
                        lowest = Some((k, m));
                    }
                }
                let (k, m) =
                    lowest.ok_or_else(|| MoleError::model("model reports zero heads"))?;
                best_head = Some(k);
                m
            }
        };

        tracing::info!("mse:{}, mae:{}, rse:{}", metrics.mse, metrics.mae, metrics.rse);
        results::append_result(&self.config.result_file, setting, &metrics)?;

        let folder = ResultsDir::create(&self.config.results_dir, setting)?;
        if save_arrays {
            let flag = options.flag.as_str();
            folder.save_array(&format!("metrics_{flag}"), metrics.to_array().to_vec(), &[7])?;
            let pred_shape: Vec<usize> = if per_head {
                vec![windows, pred_len, channels, num_heads]
            } else {
                vec![windows, pred_len, channels]
            };
            folder.save_array(&format!("pred_{flag}"), preds, &pred_shape)?;
            folder.save_array(&format!("true_{flag}"), trues, &[windows, pred_len, channels])?;
            let f = &self.config.forecast;
            let x_channels = if windows == 0 { 0 } else { inputs.len() / (windows * f.seq_len) };
            folder.save_array(&format!("x_{flag}"), inputs, &[windows, f.seq_len, x_channels])?;
        }

        if let Some(path) = &self.config.mole.save_gating_weights {
            if !gating.is_empty() {
                let weights = Tensor::cat(&gating, 0)?;
                results::save_npy(path, &weights)?;
                tracing::info!("Saved gating weights {:?} to {}", weights.dims(), path);
            }
        }

        if let Some(k) = best_head {
            tracing::info!("Best head on {} split: {}", options.flag, k);
        }

        Ok(TestReport {
            metrics,
            best_head,
            head_metrics,
            windows,
        })
    }

    /// Pick the best head on the validation split.
    ///
    /// # Errors
    ///
    /// Returns an error if the model has no heads or evaluation fails.
    pub fn select_head(&mut self, setting: &str) -> Result<usize> {
        let report = self.test(
            setting,
            &TestOptions {
                flag: Split::Val,
                load: false,
                head: HeadMode::Separate,
            },
        )?;
        report
            .best_head
            .ok_or_else(|| MoleError::model("head selection produced no head"))
    }

    /// Forecast the window after the end of the series and save it as
    /// `real_prediction.npy`.
    ///
    /// Returns predictions `[N, pred_len, C]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prediction split cannot be built or writing
    /// fails.
    pub fn predict(&mut self, setting: &str, load: bool) -> Result<Tensor> {
        let mut loader = data_provider(&self.config, Split::Pred)?;
        if load {
            self.load_checkpoint(setting)?;
        }

        let scaler = if self.config.data.inverse {
            loader.dataset().scaler().cloned()
        } else {
            None
        };

        let mut preds = Vec::with_capacity(loader.len());
        for batch in loader.iter(&self.device) {
            let batch = batch?;
            let out = self.forward_batch(&batch, &ForwardOptions::eval())?;
            let pred = out.prediction.to_device(&Device::Cpu)?;
            let pred = match &scaler {
                Some(scaler) if pred.dim(2)? == scaler.channels() => {
                    let dims = pred.dims().to_vec();
                    let mut values = pred.flatten_all()?.to_vec1::<f32>()?;
                    scaler.inverse_transform(&mut values);
                    Tensor::from_vec(values, dims, &Device::Cpu)?
                }
                _ => pred,
            };
            preds.push(pred);
        }
        if preds.is_empty() {
            return Err(MoleError::data("prediction split yielded no window"));
        }

        let preds = Tensor::cat(&preds, 0)?;
        let folder = ResultsDir::create(&self.config.results_dir, setting)?;
        let path = folder.save_tensor("real_prediction", &preds)?;
        tracing::info!("Saved prediction {:?} to {}", preds.dims(), path.display());
        Ok(preds)
    }
}

/// `cat(y[:, :label_len], zeros[B, pred_len, C])` along time.
///
/// # Errors
///
/// Returns an error if `y` is shorter than `label_len`.
pub fn decoder_input(y: &Tensor, label_len: usize, pred_len: usize) -> Result<Tensor> {
    let (batch, _, channels) = y.dims3()?;
    let start = y.narrow(1, 0, label_len)?;
    let zeros = Tensor::zeros((batch, pred_len, channels), y.dtype(), y.device())?;
    Ok(Tensor::cat(&[&start, &zeros], 1)?)
}

/// Values of head `k` from a row-major buffer whose last axis holds `heads`
/// heads.
fn select_head(values: &[f32], k: usize, heads: usize) -> Vec<f32> {
    values.iter().skip(k).step_by(heads.max(1)).copied().collect()
}

fn average(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn select_device(training: &TrainingConfig) -> Result<Device> {
    if training.use_gpu {
        #[cfg(feature = "cuda")]
        {
            let device = Device::new_cuda(training.gpu)?;
            tracing::info!("Use GPU: cuda:{}", training.gpu);
            return Ok(device);
        }
        #[cfg(not(feature = "cuda"))]
        tracing::warn!("use_gpu is set but mole-rs was built without the cuda feature");
    }
    tracing::info!("Use CPU");
    Ok(Device::Cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_input_layout() {
        let device = Device::Cpu;
        let y = Tensor::ones((2, 6, 3), DType::F32, &device).unwrap();
        let dec = decoder_input(&y, 4, 2).unwrap();

        assert_eq!(dec.dims(), &[2, 6, 3]);
        let values = dec.to_vec3::<f32>().unwrap();
        assert_eq!(values[0][3], vec![1.0, 1.0, 1.0]);
        assert_eq!(values[1][4], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decoder_input_from_label_only_window() {
        let device = Device::Cpu;
        // prediction windows carry just the label slice
        let y = Tensor::ones((1, 4, 2), DType::F32, &device).unwrap();
        let dec = decoder_input(&y, 4, 3).unwrap();
        assert_eq!(dec.dims(), &[1, 7, 2]);
    }

    #[test]
    fn test_select_head_strides() {
        // two positions, three heads
        let values = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        assert_eq!(select_head(&values, 0, 3), vec![0.0, 10.0]);
        assert_eq!(select_head(&values, 2, 3), vec![2.0, 12.0]);
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[1.0, 2.0, 3.0]), 2.0);
        assert!(average(&[]).is_nan());
    }

    #[test]
    fn test_cpu_by_default() {
        let training = TrainingConfig::default();
        assert!(select_device(&training).unwrap().is_cpu());
    }
}
