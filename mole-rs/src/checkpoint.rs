//! Best-model checkpoints.
//!
//! A checkpoint directory `<checkpoints>/<setting>/` holds:
//! - `checkpoint.safetensors`: every variable of the model
//! - `training_state.json`: epoch, best validation loss and learning rate
//! - `config.yaml`: the experiment configuration, for reproducibility

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::config::ExpConfig;
use crate::error::{MoleError, Result};

/// Weights file name.
pub const WEIGHTS_FILE: &str = "checkpoint.safetensors";
/// Training state file name.
pub const STATE_FILE: &str = "training_state.json";
/// Configuration snapshot file name.
pub const CONFIG_FILE: &str = "config.yaml";

/// Training progress stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epoch (1-based) that produced the weights
    pub epoch: usize,
    /// Validation loss of those weights
    pub best_val_loss: f32,
    /// Learning rate at the time of saving
    pub learning_rate: f64,
}

/// Checkpoint directory of one setting.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
}

impl Checkpoint {
    /// Checkpoint for `setting` under the `root` directory.
    pub fn new(root: impl AsRef<Path>, setting: &str) -> Self {
        Self {
            dir: root.as_ref().join(setting),
        }
    }

    /// Directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Weights path.
    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    /// Whether saved weights exist.
    pub fn exists(&self) -> bool {
        self.weights_path().is_file()
    }

    /// Create the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Write weights, training state and configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub fn save(&self, varmap: &VarMap, state: &TrainingState, config: &ExpConfig) -> Result<()> {
        self.create_dir()?;
        varmap
            .save(self.weights_path())
            .map_err(|e| MoleError::checkpoint(format!("Failed to save weights: {e}")))?;

        let state_json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.dir.join(STATE_FILE), state_json)?;
        config.to_file(self.dir.join(CONFIG_FILE))?;

        tracing::debug!(
            "Saved checkpoint to {} (epoch={}, val_loss={:.7})",
            self.dir.display(),
            state.epoch,
            state.best_val_loss
        );
        Ok(())
    }

    /// Load weights into `varmap`, returning the stored training state if
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Checkpoint`] if the weights are missing or do not
    /// match the model.
    pub fn load(&self, varmap: &mut VarMap) -> Result<Option<TrainingState>> {
        let weights = self.weights_path();
        if !weights.is_file() {
            return Err(MoleError::checkpoint(format!(
                "no checkpoint at {}",
                weights.display()
            )));
        }
        varmap
            .load(&weights)
            .map_err(|e| MoleError::checkpoint(format!("Failed to load weights: {e}")))?;

        let state_path = self.dir.join(STATE_FILE);
        let state = if state_path.is_file() {
            let json = std::fs::read_to_string(&state_path)?;
            Some(serde_json::from_str::<TrainingState>(&json)?)
        } else {
            None
        };

        match &state {
            Some(s) => tracing::info!(
                "Loaded checkpoint from: {} (epoch={}, val_loss={:.7})",
                self.dir.display(),
                s.epoch,
                s.best_val_loss
            ),
            None => tracing::info!("Loaded checkpoint from: {}", self.dir.display()),
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() -> Result<()> {
        let tmp = TempDir::new()?;
        let device = Device::Cpu;
        let config = ExpConfig::from_preset("etth1-mole-dlinear")?;
        let ckpt = Checkpoint::new(tmp.path(), "setting_0");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        vb.get_with_hints((2, 2), "w", Init::Const(0.5))?;

        let state = TrainingState {
            epoch: 3,
            best_val_loss: 0.25,
            learning_rate: 1e-3,
        };
        ckpt.save(&varmap, &state, &config)?;
        assert!(ckpt.exists());
        assert!(tmp.path().join("setting_0").join(CONFIG_FILE).is_file());

        let mut restored = VarMap::new();
        let vb = VarBuilder::from_varmap(&restored, DType::F32, &device);
        let w = vb.get_with_hints((2, 2), "w", Init::Const(0.0))?;
        let loaded = ckpt.load(&mut restored)?;

        assert_eq!(loaded, Some(state));
        let sum: f32 = w.sum_all()?.to_scalar()?;
        assert!((sum - 2.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let ckpt = Checkpoint::new(tmp.path(), "nothing");
        let mut varmap = VarMap::new();

        assert!(!ckpt.exists());
        assert!(matches!(
            ckpt.load(&mut varmap),
            Err(MoleError::Checkpoint(_))
        ));
    }
}
