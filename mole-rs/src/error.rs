//! Error types for mole-rs.
//!
//! # Example
//!
//! ```rust
//! use mole_rs::{ExpConfig, MoleError};
//!
//! match ExpConfig::from_preset("no-such-preset") {
//!     Ok(_) => unreachable!(),
//!     Err(MoleError::Config(msg)) => assert!(msg.contains("no-such-preset")),
//!     Err(e) => panic!("unexpected error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Result type alias for mole-rs operations.
pub type Result<T> = std::result::Result<T, MoleError>;

/// Errors that can occur in mole-rs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MoleError {
    /// Tensor operation failed.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Data(String),

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Model construction or forward error.
    #[error("model error: {0}")]
    Model(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Metric computation error.
    #[error("metrics error: {0}")]
    Metrics(#[from] forecast_tools::MetricsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MoleError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a dataset error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

impl From<forecast_tools::ScheduleError> for MoleError {
    fn from(e: forecast_tools::ScheduleError) -> Self {
        Self::Config(e.to_string())
    }
}
