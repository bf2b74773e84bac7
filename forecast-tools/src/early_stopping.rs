//! Early stopping keyed on validation loss.
//!
//! Tracks the best validation loss seen so far and stops training once no
//! improvement has been observed for `patience` consecutive epochs.
//!
//! # Example
//!
//! ```
//! use forecast_tools::early_stopping::{EarlyStopping, StoppingDecision};
//!
//! let mut early_stop = EarlyStopping::new(3, 0.0);
//! let val_losses = [0.9, 0.7, 0.71, 0.72, 0.73];
//!
//! for (epoch, &loss) in val_losses.iter().enumerate() {
//!     match early_stop.check(loss, epoch + 1) {
//!         StoppingDecision::NewBest => { /* save checkpoint */ }
//!         StoppingDecision::NoImprovement { .. } => {}
//!         StoppingDecision::Stop => break,
//!     }
//! }
//!
//! assert!(early_stop.should_stop());
//! assert_eq!(early_stop.best_epoch(), 2);
//! ```

/// Early stopping state tracker.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Number of epochs with no improvement before stopping.
    patience: usize,
    /// Minimum decrease of the loss that counts as improvement.
    delta: f32,
    /// Best validation loss observed so far.
    best_value: f32,
    /// Epoch at which the best loss was observed.
    best_epoch: usize,
    /// Number of consecutive epochs with no improvement.
    counter: usize,
    /// Whether the stopping criterion has been met.
    stopped: bool,
}

/// Result of checking a new validation loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppingDecision {
    /// New best loss, the caller should save a checkpoint.
    NewBest,
    /// No improvement, but patience not exhausted.
    NoImprovement {
        /// Number of epochs without improvement.
        count: usize,
        /// Epochs remaining before stopping.
        remaining: usize,
    },
    /// Patience exhausted, training should stop.
    Stop,
}

impl EarlyStopping {
    /// Create a new early stopping tracker.
    ///
    /// # Arguments
    ///
    /// * `patience` - Number of epochs with no improvement before stopping
    /// * `delta` - Minimum loss decrease that qualifies as improvement
    pub fn new(patience: usize, delta: f32) -> Self {
        Self {
            patience,
            delta,
            best_value: f32::INFINITY,
            best_epoch: 0,
            counter: 0,
            stopped: false,
        }
    }

    /// Check a new validation loss and update internal state.
    ///
    /// A loss improves on the best one when it is lower by at least `delta`,
    /// so with `delta == 0.0` an equal loss still counts as a new best.
    /// A NaN loss never improves.
    pub fn check(&mut self, val_loss: f32, epoch: usize) -> StoppingDecision {
        if self.stopped {
            return StoppingDecision::Stop;
        }

        let improved = self.best_value.is_infinite() && !val_loss.is_nan()
            || self.best_value - val_loss >= self.delta;

        if improved {
            tracing::debug!(
                "Validation loss decreased ({:.6} --> {:.6})",
                self.best_value,
                val_loss
            );
            self.best_value = val_loss;
            self.best_epoch = epoch;
            self.counter = 0;
            return StoppingDecision::NewBest;
        }

        self.counter += 1;
        tracing::info!("EarlyStopping counter: {} out of {}", self.counter, self.patience);

        if self.counter >= self.patience {
            self.stopped = true;
            StoppingDecision::Stop
        } else {
            StoppingDecision::NoImprovement {
                count: self.counter,
                remaining: self.patience - self.counter,
            }
        }
    }

    /// Check if training should stop (patience exhausted).
    pub fn should_stop(&self) -> bool {
        self.stopped
    }

    /// Epoch at which the best loss was observed (0 before any check).
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// Best loss observed so far.
    pub fn best_value(&self) -> f32 {
        self.best_value
    }

    /// Epochs without improvement.
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Epochs remaining before stopping.
    pub fn remaining_patience(&self) -> usize {
        if self.stopped {
            0
        } else {
            self.patience.saturating_sub(self.counter)
        }
    }

    /// Reset to the initial state.
    pub fn reset(&mut self) {
        self.best_value = f32::INFINITY;
        self.best_epoch = 0;
        self.counter = 0;
        self.stopped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_is_best() {
        let mut early_stop = EarlyStopping::new(3, 0.0);

        assert_eq!(early_stop.check(1.0, 1), StoppingDecision::NewBest);
        assert_eq!(early_stop.best_value(), 1.0);
        assert_eq!(early_stop.best_epoch(), 1);
    }

    #[test]
    fn test_equal_loss_counts_as_improvement_with_zero_delta() {
        let mut early_stop = EarlyStopping::new(2, 0.0);

        early_stop.check(0.5, 1);
        assert_eq!(early_stop.check(0.5, 2), StoppingDecision::NewBest);
        assert_eq!(early_stop.best_epoch(), 2);
        assert_eq!(early_stop.counter(), 0);
    }

    #[test]
    fn test_patience_exhausted() {
        let mut early_stop = EarlyStopping::new(3, 0.0);

        early_stop.check(1.0, 1);
        early_stop.check(1.1, 2);
        early_stop.check(1.2, 3);

        assert_eq!(early_stop.check(1.3, 4), StoppingDecision::Stop);
        assert!(early_stop.should_stop());
        assert_eq!(early_stop.remaining_patience(), 0);

        // Stays stopped even if the loss improves afterwards
        assert_eq!(early_stop.check(0.1, 5), StoppingDecision::Stop);
        assert_eq!(early_stop.best_value(), 1.0);
    }

    #[test]
    fn test_no_improvement_counts() {
        let mut early_stop = EarlyStopping::new(5, 0.0);

        early_stop.check(1.0, 1);

        match early_stop.check(1.5, 2) {
            StoppingDecision::NoImprovement { count, remaining } => {
                assert_eq!(count, 1);
                assert_eq!(remaining, 4);
            }
            other => panic!("Expected NoImprovement, got {other:?}"),
        }
    }

    #[test]
    fn test_delta_threshold() {
        let mut early_stop = EarlyStopping::new(3, 0.1);

        early_stop.check(1.0, 1);

        // Decrease of 0.05 < 0.1
        assert!(matches!(
            early_stop.check(0.95, 2),
            StoppingDecision::NoImprovement { .. }
        ));

        // Decrease of 0.2 >= 0.1
        assert_eq!(early_stop.check(0.8, 3), StoppingDecision::NewBest);
        assert_eq!(early_stop.counter(), 0);
    }

    #[test]
    fn test_nan_never_improves() {
        let mut early_stop = EarlyStopping::new(2, 0.0);

        assert!(matches!(
            early_stop.check(f32::NAN, 1),
            StoppingDecision::NoImprovement { .. }
        ));
        assert_eq!(early_stop.check(0.4, 2), StoppingDecision::NewBest);
    }

    #[test]
    fn test_reset() {
        let mut early_stop = EarlyStopping::new(1, 0.0);

        early_stop.check(1.0, 1);
        early_stop.check(2.0, 2);
        assert!(early_stop.should_stop());

        early_stop.reset();

        assert!(!early_stop.should_stop());
        assert_eq!(early_stop.counter(), 0);
        assert_eq!(early_stop.best_value(), f32::INFINITY);
    }
}
