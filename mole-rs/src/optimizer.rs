//! Adam optimizer over the experiment's variables.
//!
//! Plain Adam is expressed as [`candle_nn::AdamW`] with zero weight decay.

use candle_core::Tensor;
use candle_nn::{Optimizer, ParamsAdamW, VarMap};

use crate::error::{MoleError, Result};

/// Adam hyperparameters.
#[derive(Debug, Clone)]
pub struct AdamConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Beta1
    pub beta1: f64,
    /// Beta2
    pub beta2: f64,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl AdamConfig {
    /// Default betas and epsilon with the given learning rate.
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    /// Create the optimizer over every variable in `varmap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    pub fn build(&self, varmap: &VarMap) -> Result<Adam> {
        let params = ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: 0.0,
        };
        let inner = candle_nn::AdamW::new(varmap.all_vars(), params)
            .map_err(|e| MoleError::training(format!("Failed to create Adam: {e}")))?;
        Ok(Adam { inner })
    }
}

/// Adam optimizer wrapper.
pub struct Adam {
    inner: candle_nn::AdamW,
}

impl Adam {
    /// Backpropagate `loss` and update the variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner
            .backward_step(loss)
            .map_err(|e| MoleError::training(format!("Optimizer step failed: {e}")))
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// Set the learning rate (used by epoch schedules).
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}
