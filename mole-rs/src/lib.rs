//! # mole-rs
//!
//! Long-horizon time-series forecasting experiments with mixtures of linear
//! experts, built on candle.
//!
//! The crate drives the full experiment loop: sliding-window datasets from
//! CSV, a registry of forecasters, training with early stopping and epoch
//! learning-rate schedules, evaluation with per-head selection, and
//! forecasting past the end of the series.
//!
//! ## Models
//!
//! - **MoLE_DLinear / MoLE_RLinear / MoLE_RMLP** - `K` linear heads mixed by
//!   softmax weights computed from the timestamp of the first input step
//! - **DLinear / RLinear / RMLP** - the single-head baselines
//! - **Transformer** - vanilla encoder-decoder attention baseline
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Write a sample configuration
//! mole init etth1.yaml --preset etth1-mole-dlinear
//!
//! # Validate it
//! mole validate etth1.yaml
//!
//! # Train, pick the best head on the validation split, then test
//! mole train etth1.yaml --select-head
//!
//! # Re-evaluate a saved checkpoint with head 2 only
//! mole test etth1.yaml --head 2
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use mole_rs::exp::{Exp, HeadMode, TestOptions};
//! use mole_rs::ExpConfig;
//!
//! # fn main() -> mole_rs::Result<()> {
//! let config = ExpConfig::from_file("etth1.yaml")?;
//! let setting = config.setting(0);
//!
//! let mut exp = Exp::new(config)?;
//! exp.train(&setting)?;
//!
//! let report = exp.test(
//!     &setting,
//!     &TestOptions {
//!         head: HeadMode::Mixture,
//!         ..Default::default()
//!     },
//! )?;
//! println!("{}", report.metrics);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using Presets
//!
//! ```rust
//! use mole_rs::ExpConfig;
//!
//! # fn main() -> mole_rs::Result<()> {
//! let mut config = ExpConfig::from_preset("etth1-mole-rlinear")?;
//! config.forecast.pred_len = 336;
//! config.training.learning_rate = 1e-3;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod exp;
pub mod models;
pub mod optimizer;
pub mod results;
pub mod timefeatures;

pub use config::{ConfigOverrides, ExpConfig};
pub use error::{MoleError, Result};
pub use exp::{Exp, HeadMode, TestOptions, TestReport, TrainReport};
pub use models::{ModelFamily, ModelKind};
