//! Forecast Tools
//!
//! Loop-independent building blocks for forecasting experiments:
//! - Early stopping keyed on validation loss
//! - Epoch-level learning rate schedules
//! - Point-forecast accuracy metrics (MAE, MSE, RMSE, MAPE, MSPE, RSE, CORR)

pub mod early_stopping;
pub mod lr_scheduler;
pub mod metrics;

pub use early_stopping::{EarlyStopping, StoppingDecision};
pub use lr_scheduler::{EpochScheduler, LrAdjust, ScheduleError, StepScheduler};
pub use metrics::{metric, Metrics, MetricsError};
