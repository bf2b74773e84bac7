//! Epoch-level learning-rate schedules.
//!
//! Forecasting experiments adjust the learning rate once per epoch, after the
//! validation pass. Each [`LrAdjust`] variant maps a 1-based epoch to the new
//! learning rate, or to `None` when the rate should be left unchanged.
//!
//! # Example
//!
//! ```rust
//! use forecast_tools::lr_scheduler::{EpochScheduler, LrAdjust, StepScheduler};
//!
//! let scheduler = StepScheduler::new(LrAdjust::Type1, 1e-3);
//!
//! assert_eq!(scheduler.lr_for_epoch(1), Some(1e-3));
//! assert_eq!(scheduler.lr_for_epoch(3), Some(2.5e-4));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trait for per-epoch learning rate schedules.
pub trait EpochScheduler: Send + Sync {
    /// Learning rate to use after finishing `epoch` (1-based).
    ///
    /// `None` leaves the optimizer's current rate unchanged.
    fn lr_for_epoch(&self, epoch: usize) -> Option<f64>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Schedule kinds selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LrAdjust {
    /// Halve the rate every epoch.
    #[default]
    #[serde(rename = "type1")]
    Type1,
    /// Fixed table of rates at selected epochs.
    #[serde(rename = "type2")]
    Type2,
    /// Constant for two epochs, then decays by 0.9 per epoch.
    #[serde(rename = "type3")]
    Type3,
    /// Always the base rate.
    #[serde(rename = "constant")]
    Constant,
    /// Base rate before epoch 10, a tenth of it afterwards.
    #[serde(rename = "3")]
    DropAt10,
    /// Base rate before epoch 15, a tenth of it afterwards.
    #[serde(rename = "4")]
    DropAt15,
    /// Base rate before epoch 25, a tenth of it afterwards.
    #[serde(rename = "5")]
    DropAt25,
    /// Base rate before epoch 5, a tenth of it afterwards.
    #[serde(rename = "6")]
    DropAt5,
    /// Rate is driven per step elsewhere; no epoch adjustment.
    #[serde(rename = "TST")]
    Tst,
}

/// Rates used by [`LrAdjust::Type2`].
const TYPE2_TABLE: [(usize, f64); 7] = [
    (2, 5e-5),
    (4, 1e-5),
    (6, 5e-6),
    (8, 1e-6),
    (10, 5e-7),
    (15, 1e-7),
    (20, 5e-8),
];

impl LrAdjust {
    /// Configuration name of this schedule.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Type1 => "type1",
            Self::Type2 => "type2",
            Self::Type3 => "type3",
            Self::Constant => "constant",
            Self::DropAt10 => "3",
            Self::DropAt15 => "4",
            Self::DropAt25 => "5",
            Self::DropAt5 => "6",
            Self::Tst => "TST",
        }
    }

    /// Whether the schedule is applied at epoch boundaries.
    pub fn is_epoch_based(&self) -> bool {
        !matches!(self, Self::Tst)
    }
}

impl fmt::Display for LrAdjust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LrAdjust {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "type1" => Self::Type1,
            "type2" => Self::Type2,
            "type3" => Self::Type3,
            "constant" => Self::Constant,
            "3" => Self::DropAt10,
            "4" => Self::DropAt15,
            "5" => Self::DropAt25,
            "6" => Self::DropAt5,
            "TST" => Self::Tst,
            other => return Err(ScheduleError::UnknownSchedule(other.to_string())),
        })
    }
}

/// Epoch scheduler built from an [`LrAdjust`] kind and a base rate.
#[derive(Debug, Clone)]
pub struct StepScheduler {
    kind: LrAdjust,
    base_lr: f64,
}

impl StepScheduler {
    /// Create a scheduler around the configured base learning rate.
    pub fn new(kind: LrAdjust, base_lr: f64) -> Self {
        Self { kind, base_lr }
    }

    /// Build a scheduler, rejecting non-positive or non-finite rates.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidLearningRate`] if `base_lr` is not a
    /// positive finite number.
    pub fn try_new(kind: LrAdjust, base_lr: f64) -> Result<Self, ScheduleError> {
        if !(base_lr.is_finite() && base_lr > 0.0) {
            return Err(ScheduleError::InvalidLearningRate(base_lr));
        }
        Ok(Self::new(kind, base_lr))
    }

    /// Schedule kind.
    #[inline]
    pub fn kind(&self) -> LrAdjust {
        self.kind
    }

    /// Base learning rate.
    #[inline]
    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    fn drop_after(&self, boundary: usize, epoch: usize) -> f64 {
        if epoch < boundary {
            self.base_lr
        } else {
            self.base_lr * 0.1
        }
    }
}

impl EpochScheduler for StepScheduler {
    fn lr_for_epoch(&self, epoch: usize) -> Option<f64> {
        let epoch = epoch.max(1);
        match self.kind {
            LrAdjust::Type1 => Some(self.base_lr * 0.5f64.powi((epoch - 1) as i32)),
            LrAdjust::Type2 => TYPE2_TABLE
                .iter()
                .find(|(e, _)| *e == epoch)
                .map(|(_, lr)| *lr),
            LrAdjust::Type3 => Some(if epoch < 3 {
                self.base_lr
            } else {
                self.base_lr * 0.9f64.powi((epoch - 3) as i32)
            }),
            LrAdjust::Constant => Some(self.base_lr),
            LrAdjust::DropAt10 => Some(self.drop_after(10, epoch)),
            LrAdjust::DropAt15 => Some(self.drop_after(15, epoch)),
            LrAdjust::DropAt25 => Some(self.drop_after(25, epoch)),
            LrAdjust::DropAt5 => Some(self.drop_after(5, epoch)),
            LrAdjust::Tst => None,
        }
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Errors raised by schedule construction or parsing.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Unknown schedule name.
    #[error("unknown learning rate schedule: {0}")]
    UnknownSchedule(String),

    /// Invalid base learning rate.
    #[error("invalid learning rate: {0} (must be positive and finite)")]
    InvalidLearningRate(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_type1_halves_each_epoch() {
        let scheduler = StepScheduler::new(LrAdjust::Type1, 1e-3);

        assert!(approx_eq(scheduler.lr_for_epoch(1).unwrap(), 1e-3));
        assert!(approx_eq(scheduler.lr_for_epoch(2).unwrap(), 5e-4));
        assert!(approx_eq(scheduler.lr_for_epoch(4).unwrap(), 1.25e-4));
    }

    #[test]
    fn test_type2_only_listed_epochs() {
        let scheduler = StepScheduler::new(LrAdjust::Type2, 1e-3);

        assert_eq!(scheduler.lr_for_epoch(1), None);
        assert_eq!(scheduler.lr_for_epoch(2), Some(5e-5));
        assert_eq!(scheduler.lr_for_epoch(3), None);
        assert_eq!(scheduler.lr_for_epoch(20), Some(5e-8));
    }

    #[test]
    fn test_type3_decay() {
        let scheduler = StepScheduler::new(LrAdjust::Type3, 1e-2);

        assert!(approx_eq(scheduler.lr_for_epoch(2).unwrap(), 1e-2));
        assert!(approx_eq(scheduler.lr_for_epoch(3).unwrap(), 1e-2));
        assert!(approx_eq(scheduler.lr_for_epoch(5).unwrap(), 1e-2 * 0.81));
    }

    #[test]
    fn test_drop_schedules() {
        let scheduler = StepScheduler::new(LrAdjust::DropAt10, 1e-3);
        assert!(approx_eq(scheduler.lr_for_epoch(9).unwrap(), 1e-3));
        assert!(approx_eq(scheduler.lr_for_epoch(10).unwrap(), 1e-4));

        let scheduler = StepScheduler::new(LrAdjust::DropAt5, 1e-3);
        assert!(approx_eq(scheduler.lr_for_epoch(5).unwrap(), 1e-4));
    }

    #[test]
    fn test_tst_is_not_epoch_based() {
        let scheduler = StepScheduler::new(LrAdjust::Tst, 1e-3);

        assert_eq!(scheduler.lr_for_epoch(1), None);
        assert!(!LrAdjust::Tst.is_epoch_based());
        assert!(LrAdjust::Constant.is_epoch_based());
    }

    #[test]
    fn test_parse_and_display() {
        for name in ["type1", "type2", "type3", "constant", "3", "4", "5", "6", "TST"] {
            let kind: LrAdjust = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("cosine".parse::<LrAdjust>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let kind: LrAdjust = serde_yaml::from_str("\"4\"").unwrap();
        assert_eq!(kind, LrAdjust::DropAt15);
        let kind: LrAdjust = serde_yaml::from_str("type3").unwrap();
        assert_eq!(kind, LrAdjust::Type3);
    }

    #[test]
    fn test_try_new_rejects_bad_rates() {
        assert!(StepScheduler::try_new(LrAdjust::Type1, 0.0).is_err());
        assert!(StepScheduler::try_new(LrAdjust::Type1, f64::NAN).is_err());
        assert!(StepScheduler::try_new(LrAdjust::Type1, 1e-4).is_ok());
    }
}
