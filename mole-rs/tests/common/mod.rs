//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Rows in the synthetic series.
pub const ROWS: usize = 200;

/// Write an hourly CSV with columns `date, a, b, OT` made of noisy daily
/// cycles.
pub fn write_series(dir: &Path) -> PathBuf {
    let mut csv = String::from("date,a,b,OT\n");
    for i in 0..ROWS {
        let day = i / 24;
        let hour = i % 24;
        let t = i as f64;
        let a = (t * std::f64::consts::TAU / 24.0).sin();
        let b = (t * std::f64::consts::TAU / 12.0).cos() * 0.5;
        let ot = a + b + 0.01 * ((i * 37 % 11) as f64);
        writeln!(
            csv,
            "2020-01-{:02} {:02}:00:00,{a:.5},{b:.5},{ot:.5}",
            day + 1,
            hour
        )
        .unwrap();
    }
    let path = dir.join("series.csv");
    fs::write(&path, csv).unwrap();
    path
}

/// Experiment YAML over the synthetic series with small windows.
pub fn config_yaml(dir: &Path, model: &str) -> String {
    format!(
        r#"
model: {model}
model_id: synthetic
checkpoints: {root}/checkpoints
results_dir: {root}/results
result_file: {root}/result.txt
data:
  kind: custom
  root_path: {root}
  data_path: series.csv
  features: M
  target: OT
  freq: h
forecast:
  seq_len: 24
  label_len: 12
  pred_len: 8
  enc_in: 3
  dec_in: 3
  c_out: 3
mole:
  t_dim: 3
  head_dropout: 0.1
transformer:
  d_model: 8
  n_heads: 2
  e_layers: 1
  d_layers: 1
  d_ff: 16
  dropout: 0.0
training:
  train_epochs: 2
  batch_size: 8
  patience: 3
  learning_rate: 0.005
  log_interval: 5
"#,
        root = dir.display()
    )
}

/// Write the series and a config for `model`, returning the config path.
pub fn setup(dir: &Path, model: &str) -> PathBuf {
    write_series(dir);
    let path = dir.join("config.yaml");
    fs::write(&path, config_yaml(dir, model)).unwrap();
    path
}
