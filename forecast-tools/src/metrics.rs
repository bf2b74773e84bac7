//! Point-forecast accuracy metrics.
//!
//! All metrics operate on row-major `[N, L, C]` buffers (samples, horizon,
//! channels) holding predictions and ground truth of identical shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated forecast metrics.
///
/// The derived ordering compares fields in declaration order, so sorting by
/// `Metrics` ranks primarily by MAE, then MSE, and so on.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean absolute error.
    pub mae: f32,
    /// Mean squared error.
    pub mse: f32,
    /// Root mean squared error.
    pub rmse: f32,
    /// Mean absolute percentage error.
    pub mape: f32,
    /// Mean squared percentage error.
    pub mspe: f32,
    /// Root relative squared error.
    pub rse: f32,
    /// Mean Pearson correlation across horizon/channel positions.
    pub corr: f32,
}

impl Metrics {
    /// Values in `[mae, mse, rmse, mape, mspe, rse, corr]` order.
    pub fn to_array(&self) -> [f32; 7] {
        [
            self.mae, self.mse, self.rmse, self.mape, self.mspe, self.rse, self.corr,
        ]
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mse:{}, mae:{}, rse:{}, corr:{}",
            self.mse, self.mae, self.rse, self.corr
        )
    }
}

/// Errors raised when metric inputs are inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Prediction and truth lengths differ.
    #[error("length mismatch: pred has {pred} values, truth has {truth}")]
    LengthMismatch {
        /// Prediction length
        pred: usize,
        /// Truth length
        truth: usize,
    },

    /// Buffer length does not match the declared shape.
    #[error("shape {shape:?} does not match buffer length {len}")]
    ShapeMismatch {
        /// Declared `[N, L, C]` shape
        shape: (usize, usize, usize),
        /// Actual buffer length
        len: usize,
    },

    /// Nothing to evaluate.
    #[error("cannot compute metrics over empty input")]
    Empty,
}

/// Compute all metrics over `[N, L, C]` buffers.
///
/// # Errors
///
/// Returns an error if the buffers are empty or do not match `shape`.
pub fn metric(
    pred: &[f32],
    truth: &[f32],
    shape: (usize, usize, usize),
) -> Result<Metrics, MetricsError> {
    if pred.len() != truth.len() {
        return Err(MetricsError::LengthMismatch {
            pred: pred.len(),
            truth: truth.len(),
        });
    }
    let (n, l, c) = shape;
    if n * l * c != pred.len() {
        return Err(MetricsError::ShapeMismatch {
            shape,
            len: pred.len(),
        });
    }
    if pred.is_empty() {
        return Err(MetricsError::Empty);
    }

    let mse = mse(pred, truth);
    Ok(Metrics {
        mae: mae(pred, truth),
        mse,
        rmse: mse.sqrt(),
        mape: mape(pred, truth),
        mspe: mspe(pred, truth),
        rse: rse(pred, truth),
        corr: corr(pred, truth, shape),
    })
}

/// Mean absolute error.
pub fn mae(pred: &[f32], truth: &[f32]) -> f32 {
    mean(pred.iter().zip(truth).map(|(p, t)| (p - t).abs()))
}

/// Mean squared error.
pub fn mse(pred: &[f32], truth: &[f32]) -> f32 {
    mean(pred.iter().zip(truth).map(|(p, t)| (p - t).powi(2)))
}

/// Root mean squared error.
pub fn rmse(pred: &[f32], truth: &[f32]) -> f32 {
    mse(pred, truth).sqrt()
}

/// Mean absolute percentage error. Zero targets yield infinities.
pub fn mape(pred: &[f32], truth: &[f32]) -> f32 {
    mean(pred.iter().zip(truth).map(|(p, t)| ((p - t) / t).abs()))
}

/// Mean squared percentage error.
pub fn mspe(pred: &[f32], truth: &[f32]) -> f32 {
    mean(pred.iter().zip(truth).map(|(p, t)| ((p - t) / t).powi(2)))
}

/// Root relative squared error against the global mean of `truth`.
pub fn rse(pred: &[f32], truth: &[f32]) -> f32 {
    let truth_mean = mean(truth.iter().copied()) as f64;
    let (num, den) = pred
        .iter()
        .zip(truth)
        .fold((0.0f64, 0.0f64), |(num, den), (&p, &t)| {
            let t = t as f64;
            (num + (t - p as f64).powi(2), den + (t - truth_mean).powi(2))
        });
    (num.sqrt() / den.sqrt()) as f32
}

/// Pearson correlation per `(l, c)` position across the sample axis,
/// averaged over positions. Positions with zero variance contribute 0.
///
/// The CORR printed by the common long-horizon benchmark scripts scales
/// the covariance differently, so values are not comparable with their
/// published tables.
pub fn corr(pred: &[f32], truth: &[f32], shape: (usize, usize, usize)) -> f32 {
    let (n, l, c) = shape;
    let positions = l * c;
    if n == 0 || positions == 0 {
        return 0.0;
    }

    let mut pred_mean = vec![0.0f64; positions];
    let mut truth_mean = vec![0.0f64; positions];
    for sample in 0..n {
        let base = sample * positions;
        for pos in 0..positions {
            pred_mean[pos] += pred[base + pos] as f64;
            truth_mean[pos] += truth[base + pos] as f64;
        }
    }
    for pos in 0..positions {
        pred_mean[pos] /= n as f64;
        truth_mean[pos] /= n as f64;
    }

    let mut cov = vec![0.0f64; positions];
    let mut pred_var = vec![0.0f64; positions];
    let mut truth_var = vec![0.0f64; positions];
    for sample in 0..n {
        let base = sample * positions;
        for pos in 0..positions {
            let dp = pred[base + pos] as f64 - pred_mean[pos];
            let dt = truth[base + pos] as f64 - truth_mean[pos];
            cov[pos] += dp * dt;
            pred_var[pos] += dp * dp;
            truth_var[pos] += dt * dt;
        }
    }

    let total: f64 = (0..positions)
        .map(|pos| {
            let denom = (pred_var[pos] * truth_var[pos]).sqrt();
            if denom > 0.0 {
                cov[pos] / denom
            } else {
                0.0
            }
        })
        .sum();
    (total / positions as f64) as f32
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_perfect_forecast() {
        let truth = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let m = metric(&truth, &truth, (3, 2, 1)).unwrap();

        assert_eq!(m.mae, 0.0);
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.rse, 0.0);
        assert!((m.corr - 1.0).abs() < EPS);
    }

    #[test]
    fn test_error_metrics() {
        let pred = vec![2.0, 2.0, 2.0, 2.0];
        let truth = vec![1.0, 1.0, 4.0, 4.0];
        let m = metric(&pred, &truth, (2, 2, 1)).unwrap();

        assert!((m.mae - 1.5).abs() < EPS);
        assert!((m.mse - 2.5).abs() < EPS);
        assert!((m.rmse - 2.5f32.sqrt()).abs() < EPS);
        // |1/1|, |1/1|, |2/4|, |2/4|
        assert!((m.mape - 0.75).abs() < EPS);
        // sqrt(10) / sqrt(9)
        assert!((m.rse - (10.0f32.sqrt() / 3.0)).abs() < EPS);
    }

    #[test]
    fn test_constant_prediction_has_zero_corr() {
        let pred = vec![0.5; 4];
        let truth = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(corr(&pred, &truth, (4, 1, 1)), 0.0);
    }

    #[test]
    fn test_anticorrelated() {
        let pred = vec![3.0, 2.0, 1.0];
        let truth = vec![1.0, 2.0, 3.0];
        assert!((corr(&pred, &truth, (3, 1, 1)) + 1.0).abs() < EPS);
    }

    #[test]
    fn test_shape_errors() {
        assert!(matches!(
            metric(&[1.0, 2.0], &[1.0], (1, 2, 1)),
            Err(MetricsError::LengthMismatch { .. })
        ));
        assert!(matches!(
            metric(&[1.0, 2.0], &[1.0, 2.0], (1, 3, 1)),
            Err(MetricsError::ShapeMismatch { .. })
        ));
        assert!(matches!(metric(&[], &[], (0, 1, 1)), Err(MetricsError::Empty)));
    }

    #[test]
    fn test_ordering_prefers_lower_mae() {
        let truth = vec![1.0, 2.0, 3.0, 4.0];
        let close = metric(&[1.1, 2.1, 3.1, 4.1], &truth, (4, 1, 1)).unwrap();
        let far = metric(&[2.0, 3.0, 4.0, 5.0], &truth, (4, 1, 1)).unwrap();

        assert!(close < far);
    }

    #[test]
    fn test_display_format() {
        let m = Metrics {
            mae: 1.0,
            mse: 2.0,
            rmse: 0.0,
            mape: 0.0,
            mspe: 0.0,
            rse: 3.0,
            corr: 0.5,
        };
        assert_eq!(m.to_string(), "mse:2, mae:1, rse:3, corr:0.5");
    }
}
