//! Sliding-window datasets over CSV time series.
//!
//! This module provides:
//! - [`TimeSeriesFrame`] - a parsed CSV with a `date` column and numeric columns
//! - [`StandardScaler`] - per-channel standardization fitted on the training split
//! - [`WindowDataset`] - input/target windows with timestamp features for one split
//! - [`DataLoader`] - batched, optionally shuffled iteration yielding [`Batch`]
//! - [`data_provider`] - split-specific loader construction
//!
//! # Example
//!
//! ```no_run
//! use candle_core::Device;
//! use mole_rs::data::{data_provider, Split};
//! use mole_rs::ExpConfig;
//!
//! # fn main() -> mole_rs::Result<()> {
//! let config = ExpConfig::from_preset("etth1-mole-dlinear")?;
//! let mut loader = data_provider(&config, Split::Train)?;
//!
//! for batch in loader.iter(&Device::Cpu) {
//!     let batch = batch?;
//!     println!("x: {:?}, y: {:?}", batch.x.dims(), batch.y.dims());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{DataKind, ExpConfig, Features};
use crate::error::{MoleError, Result};
use crate::timefeatures::{self, Frequency};

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training windows.
    Train,
    /// Validation windows.
    Val,
    /// Test windows.
    Test,
    /// The single window after the end of the series.
    Pred,
}

impl Split {
    /// Name used in file suffixes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
            Self::Pred => "pred",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Train => 0,
            Self::Val => 1,
            Self::Test => 2,
            Self::Pred => 3,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = MoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "val" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            "pred" => Ok(Self::Pred),
            other => Err(MoleError::config(format!("unknown split: {other}"))),
        }
    }
}

/// Parsed CSV: timestamps plus numeric columns, stored row-major.
#[derive(Debug, Clone)]
pub struct TimeSeriesFrame {
    /// Row timestamps.
    pub dates: Vec<NaiveDateTime>,
    /// Value column names (without `date`).
    pub columns: Vec<String>,
    /// `rows x columns` values.
    pub values: Vec<f32>,
}

impl TimeSeriesFrame {
    /// Read a CSV file whose header contains a `date` column.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the `date` column is
    /// missing, or a cell is not numeric.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let date_idx = headers
            .iter()
            .position(|h| h.trim() == "date")
            .ok_or_else(|| MoleError::data(format!("{} has no 'date' column", path.display())))?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx)
            .map(|(_, h)| h.trim().to_string())
            .collect();

        let mut dates = Vec::new();
        let mut values = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            for (i, field) in record.iter().enumerate() {
                if i == date_idx {
                    dates.push(timefeatures::parse_timestamp(field)?);
                } else {
                    let value = field.trim().parse::<f32>().map_err(|_| {
                        MoleError::data(format!(
                            "row {}: column '{}' is not numeric: {field}",
                            row + 1,
                            headers.get(i).unwrap_or("?")
                        ))
                    })?;
                    values.push(value);
                }
            }
        }

        if dates.is_empty() {
            return Err(MoleError::data(format!("{} contains no rows", path.display())));
        }

        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.dates.len()
    }

    /// Keep only `names`, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Data`] if a column is missing.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| MoleError::data(format!("missing column '{name}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        let width = self.columns.len();
        let mut values = Vec::with_capacity(self.rows() * indices.len());
        for row in 0..self.rows() {
            values.extend(indices.iter().map(|&i| self.values[row * width + i]));
        }

        Ok(Self {
            dates: self.dates.clone(),
            columns: names.to_vec(),
            values,
        })
    }
}

/// Per-channel standardization.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl StandardScaler {
    /// Fit on the first `rows` rows of a row-major `channels`-wide buffer.
    pub fn fit(values: &[f32], channels: usize) -> Self {
        let rows = if channels == 0 { 0 } else { values.len() / channels };
        let mut mean = vec![0.0f64; channels];
        let mut sq = vec![0.0f64; channels];
        for row in values.chunks_exact(channels.max(1)).take(rows) {
            for (c, &v) in row.iter().enumerate() {
                mean[c] += v as f64;
            }
        }
        let n = rows.max(1) as f64;
        for m in &mut mean {
            *m /= n;
        }
        for row in values.chunks_exact(channels.max(1)).take(rows) {
            for (c, &v) in row.iter().enumerate() {
                sq[c] += (v as f64 - mean[c]).powi(2);
            }
        }
        let std = sq
            .iter()
            .map(|s| {
                let std = (s / n).sqrt();
                if std > 0.0 {
                    std as f32
                } else {
                    1.0
                }
            })
            .collect();

        Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Standardize a row-major buffer in place.
    pub fn transform(&self, values: &mut [f32]) {
        let channels = self.channels();
        for (i, v) in values.iter_mut().enumerate() {
            let c = i % channels;
            *v = (*v - self.mean[c]) / self.std[c];
        }
    }

    /// Undo [`StandardScaler::transform`] in place.
    pub fn inverse_transform(&self, values: &mut [f32]) {
        let channels = self.channels();
        for (i, v) in values.iter_mut().enumerate() {
            let c = i % channels;
            *v = *v * self.std[c] + self.mean[c];
        }
    }
}

/// One window pair, row-major.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `[seq_len, C]`
    pub x: Vec<f32>,
    /// `[y_len, C]`
    pub y: Vec<f32>,
    /// `[seq_len, T]`
    pub x_mark: Vec<f32>,
    /// `[label_len + pred_len, T]`
    pub y_mark: Vec<f32>,
}

/// A batch of windows as tensors.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input window `[B, seq_len, C]`.
    pub x: Tensor,
    /// Target window `[B, y_len, C]`; `y_len` is `label_len` for predictions.
    pub y: Tensor,
    /// Input timestamp features `[B, seq_len, T]`.
    pub x_mark: Tensor,
    /// Target timestamp features `[B, label_len + pred_len, T]`.
    pub y_mark: Tensor,
}

impl Batch {
    /// Number of windows.
    pub fn batch_size(&self) -> usize {
        self.x.dims()[0]
    }
}

/// Windows of one split.
#[derive(Debug, Clone)]
pub struct WindowDataset {
    split: Split,
    data: Vec<f32>,
    marks: Vec<f32>,
    rows: usize,
    channels: usize,
    mark_dim: usize,
    seq_len: usize,
    label_len: usize,
    pred_len: usize,
    scaler: Option<StandardScaler>,
    columns: Vec<String>,
    last_date: NaiveDateTime,
}

impl WindowDataset {
    /// Build the windows of `split` from a CSV according to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the split is too
    /// short for a single window.
    pub fn from_config(config: &ExpConfig, split: Split) -> Result<Self> {
        let path = Path::new(&config.data.root_path).join(&config.data.data_path);
        let frame = TimeSeriesFrame::from_csv(&path)?;
        Self::from_frame(config, &frame, split)
    }

    /// Build the windows of `split` from an already parsed frame.
    ///
    /// # Errors
    ///
    /// Returns an error if columns are missing or the split is too short.
    pub fn from_frame(config: &ExpConfig, frame: &TimeSeriesFrame, split: Split) -> Result<Self> {
        let data_cfg = &config.data;
        let f = &config.forecast;
        let freq = Frequency::parse(&data_cfg.freq)?;

        let columns = select_columns(frame, data_cfg.kind, data_cfg.features, &data_cfg.target)?;
        let frame = frame.select(&columns)?;
        let channels = columns.len();
        let n = frame.rows();

        let (border1, border2, train_end) = borders(data_cfg.kind, n, f.seq_len, split)?;

        let scaler = if data_cfg.scale {
            let fit_rows = if split == Split::Pred { n } else { train_end };
            Some(StandardScaler::fit(
                &frame.values[..fit_rows * channels],
                channels,
            ))
        } else {
            None
        };

        let mut data = frame.values[border1 * channels..border2 * channels].to_vec();
        if let Some(scaler) = &scaler {
            scaler.transform(&mut data);
        }

        let mut dates: Vec<NaiveDateTime> = frame.dates[border1..border2].to_vec();
        let last_date = *dates
            .last()
            .ok_or_else(|| MoleError::data(format!("{split} split is empty")))?;
        if split == Split::Pred {
            dates.extend(freq.future_dates(last_date, f.pred_len));
        }

        let mark_dim = timefeatures::feature_count(&freq, data_cfg.embed);
        let marks: Vec<f32> = dates
            .iter()
            .flat_map(|d| timefeatures::time_features(d, &freq, data_cfg.embed))
            .collect();

        let dataset = Self {
            split,
            data,
            marks,
            rows: border2 - border1,
            channels,
            mark_dim,
            seq_len: f.seq_len,
            label_len: f.label_len,
            pred_len: f.pred_len,
            scaler,
            columns,
            last_date,
        };

        tracing::debug!("{} split: {} rows, {} windows", split, dataset.rows, dataset.len());
        Ok(dataset)
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        match self.split {
            Split::Pred => (self.rows + 1).saturating_sub(self.seq_len),
            _ => (self.rows + 1).saturating_sub(self.seq_len + self.pred_len),
        }
    }

    /// Whether the split holds no complete window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split of this dataset.
    pub fn split(&self) -> Split {
        self.split
    }

    /// Value channels per row.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Timestamp features per row.
    pub fn mark_dim(&self) -> usize {
        self.mark_dim
    }

    /// Selected value columns, in channel order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows of the target window (`label_len` for predictions).
    pub fn y_len(&self) -> usize {
        match self.split {
            Split::Pred => self.label_len,
            _ => self.label_len + self.pred_len,
        }
    }

    /// Scaler fitted for this split, if scaling is enabled.
    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    /// Last observed timestamp of the split.
    pub fn last_date(&self) -> NaiveDateTime {
        self.last_date
    }

    /// Window at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn get(&self, index: usize) -> Sample {
        let s_begin = index;
        let s_end = s_begin + self.seq_len;
        let r_begin = s_end - self.label_len;
        let r_end = r_begin + self.label_len + self.pred_len;
        let y_end = r_begin + self.y_len();

        let c = self.channels;
        let t = self.mark_dim;
        Sample {
            x: self.data[s_begin * c..s_end * c].to_vec(),
            y: self.data[r_begin * c..y_end * c].to_vec(),
            x_mark: self.marks[s_begin * t..s_end * t].to_vec(),
            y_mark: self.marks[r_begin * t..r_end * t].to_vec(),
        }
    }

    /// Stack the windows at `indices` into a [`Batch`].
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation fails.
    pub fn collate(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        let b = indices.len();
        let mut x = Vec::with_capacity(b * self.seq_len * self.channels);
        let mut y = Vec::with_capacity(b * self.y_len() * self.channels);
        let mut x_mark = Vec::with_capacity(b * self.seq_len * self.mark_dim);
        let mut y_mark = Vec::with_capacity(b * (self.label_len + self.pred_len) * self.mark_dim);
        for &i in indices {
            let sample = self.get(i);
            x.extend(sample.x);
            y.extend(sample.y);
            x_mark.extend(sample.x_mark);
            y_mark.extend(sample.y_mark);
        }

        Ok(Batch {
            x: Tensor::from_vec(x, (b, self.seq_len, self.channels), device)?,
            y: Tensor::from_vec(y, (b, self.y_len(), self.channels), device)?,
            x_mark: Tensor::from_vec(x_mark, (b, self.seq_len, self.mark_dim), device)?,
            y_mark: Tensor::from_vec(
                y_mark,
                (b, self.label_len + self.pred_len, self.mark_dim),
                device,
            )?,
        })
    }
}

fn select_columns(
    frame: &TimeSeriesFrame,
    kind: DataKind,
    features: Features,
    target: &str,
) -> Result<Vec<String>> {
    let has_target = frame.columns.iter().any(|c| c == target);
    match features {
        Features::S => {
            if !has_target {
                return Err(MoleError::data(format!("target column '{target}' not found")));
            }
            Ok(vec![target.to_string()])
        }
        Features::M | Features::MS => {
            if kind == DataKind::Custom {
                if !has_target {
                    return Err(MoleError::data(format!("target column '{target}' not found")));
                }
                let mut cols: Vec<String> = frame
                    .columns
                    .iter()
                    .filter(|c| c.as_str() != target)
                    .cloned()
                    .collect();
                cols.push(target.to_string());
                Ok(cols)
            } else {
                Ok(frame.columns.clone())
            }
        }
    }
}

/// `(border1, border2, train_end)` row range of a split.
fn borders(kind: DataKind, n: usize, seq_len: usize, split: Split) -> Result<(usize, usize, usize)> {
    if split == Split::Pred {
        if n < seq_len {
            return Err(MoleError::data(format!(
                "series has {n} rows, fewer than seq_len {seq_len}"
            )));
        }
        return Ok((n - seq_len, n, n));
    }

    let (train_end, val_end, test_end) = match kind {
        DataKind::Etth1 | DataKind::Etth2 => (12 * 30 * 24, 16 * 30 * 24, 20 * 30 * 24),
        DataKind::Ettm1 | DataKind::Ettm2 => {
            (12 * 30 * 24 * 4, 16 * 30 * 24 * 4, 20 * 30 * 24 * 4)
        }
        DataKind::Custom => {
            let num_train = (n as f64 * 0.7) as usize;
            let num_test = (n as f64 * 0.2) as usize;
            let num_vali = n - num_train - num_test;
            (num_train, num_train + num_vali, n)
        }
    };
    if test_end > n {
        return Err(MoleError::data(format!(
            "{} layout needs {test_end} rows, file has {n}",
            kind.as_str()
        )));
    }

    let starts = [0, train_end, val_end];
    let ends = [train_end, val_end, test_end];
    let i = split.index();
    let border1 = if i == 0 {
        0
    } else {
        starts[i].checked_sub(seq_len).ok_or_else(|| {
            MoleError::data(format!(
                "seq_len {seq_len} is longer than the data preceding the {split} split"
            ))
        })?
    };

    Ok((border1, ends[i], train_end))
}

/// Batched iteration over a [`WindowDataset`].
#[derive(Debug)]
pub struct DataLoader {
    dataset: WindowDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Create a loader.
    pub fn new(
        dataset: WindowDataset,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            drop_last,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Underlying dataset.
    pub fn dataset(&self) -> &WindowDataset {
        &self.dataset
    }

    /// Number of batches per pass.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Whether a pass yields no batch.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over one pass; shuffled loaders draw a fresh order each call.
    pub fn iter(&mut self, device: &Device) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        if self.drop_last {
            order.truncate(self.len() * self.batch_size);
        }
        BatchIter {
            dataset: &self.dataset,
            order,
            batch_size: self.batch_size,
            position: 0,
            device: device.clone(),
        }
    }
}

/// Iterator returned by [`DataLoader::iter`].
pub struct BatchIter<'a> {
    dataset: &'a WindowDataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: Device,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;
        Some(self.dataset.collate(indices, &self.device))
    }
}

/// Build the loader for `split` with split-specific batching:
/// train and val shuffle and drop the last partial batch, test keeps input
/// order and every window, pred uses batches of one.
///
/// # Errors
///
/// Returns an error if the dataset cannot be built.
pub fn data_provider(config: &ExpConfig, split: Split) -> Result<DataLoader> {
    let dataset = WindowDataset::from_config(config, split)?;
    Ok(loader_for(config, dataset))
}

/// Wrap an existing dataset with the batching rules of its split.
pub fn loader_for(config: &ExpConfig, dataset: WindowDataset) -> DataLoader {
    let split = dataset.split();
    let (batch_size, shuffle, drop_last) = match split {
        Split::Train | Split::Val => (config.training.batch_size, true, true),
        Split::Test => (config.training.batch_size, false, false),
        Split::Pred => (1, false, false),
    };
    tracing::info!("{}: {} windows", split, dataset.len());
    DataLoader::new(
        dataset,
        batch_size,
        shuffle,
        drop_last,
        config.seed.wrapping_add(split.index() as u64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,a,OT,b").unwrap();
        let start = timefeatures::parse_timestamp("2020-01-01 00:00:00").unwrap();
        let freq = Frequency::parse("h").unwrap();
        for i in 0..rows {
            let ts = freq.advance(start, i);
            writeln!(
                file,
                "{},{},{},{}",
                ts.format("%Y-%m-%d %H:%M:%S"),
                i,
                i * 10,
                100 + i
            )
            .unwrap();
        }
        file
    }

    fn config_for(file: &NamedTempFile) -> ExpConfig {
        let mut config = ExpConfig::etth1_preset(ModelKind::DLinear);
        let path = file.path();
        config.data.kind = DataKind::Custom;
        config.data.root_path = path.parent().unwrap().display().to_string();
        config.data.data_path = path.file_name().unwrap().to_string_lossy().into_owned();
        config.data.scale = false;
        config.forecast.seq_len = 8;
        config.forecast.label_len = 4;
        config.forecast.pred_len = 2;
        config.forecast.enc_in = 3;
        config.training.batch_size = 4;
        config
    }

    #[test]
    fn test_custom_split_borders() {
        // 100 rows: 70 train, 10 val, 20 test
        assert_eq!(borders(DataKind::Custom, 100, 8, Split::Train).unwrap(), (0, 70, 70));
        assert_eq!(borders(DataKind::Custom, 100, 8, Split::Val).unwrap(), (62, 80, 70));
        assert_eq!(borders(DataKind::Custom, 100, 8, Split::Test).unwrap(), (72, 100, 70));
        assert_eq!(borders(DataKind::Custom, 100, 8, Split::Pred).unwrap(), (92, 100, 100));
    }

    #[test]
    fn test_ett_layout_requires_full_file() {
        assert!(borders(DataKind::Etth1, 100, 8, Split::Train).is_err());
        assert_eq!(
            borders(DataKind::Etth1, 17420, 336, Split::Val).unwrap(),
            (8640 - 336, 11520, 8640)
        );
    }

    #[test]
    fn test_window_layout_moves_target_last() {
        let file = write_csv(100);
        let config = config_for(&file);
        let ds = WindowDataset::from_config(&config, Split::Train).unwrap();

        assert_eq!(ds.columns(), &["a".to_string(), "b".to_string(), "OT".to_string()]);
        assert_eq!(ds.len(), 70 - 8 - 2 + 1);
        assert_eq!(ds.mark_dim(), 4);

        let sample = ds.get(3);
        // x starts at row 3: [a, b, OT] = [3, 103, 30]
        assert_eq!(&sample.x[..3], &[3.0, 103.0, 30.0]);
        // y starts at row 3 + 8 - 4 = 7 and spans label + pred rows
        assert_eq!(sample.y.len(), (4 + 2) * 3);
        assert_eq!(sample.y[0], 7.0);
        assert_eq!(sample.y_mark.len(), 6 * 4);
    }

    #[test]
    fn test_univariate_selection() {
        let file = write_csv(100);
        let mut config = config_for(&file);
        config.data.features = Features::S;
        let ds = WindowDataset::from_config(&config, Split::Test).unwrap();

        assert_eq!(ds.channels(), 1);
        assert_eq!(ds.get(0).x[0], 72.0 * 10.0);

        config.data.target = "missing".into();
        assert!(WindowDataset::from_config(&config, Split::Test).is_err());
    }

    #[test]
    fn test_pred_split_has_future_marks() {
        let file = write_csv(50);
        let config = config_for(&file);
        let ds = WindowDataset::from_config(&config, Split::Pred).unwrap();

        assert_eq!(ds.len(), 1);
        assert_eq!(ds.y_len(), 4);
        let sample = ds.get(0);
        assert_eq!(sample.y.len(), 4 * 3);
        assert_eq!(sample.y_mark.len(), (4 + 2) * 4);
        assert_eq!(
            ds.last_date(),
            timefeatures::parse_timestamp("2020-01-03 01:00:00").unwrap()
        );
    }

    #[test]
    fn test_scaler_roundtrip() {
        let values = vec![1.0, 10.0, 3.0, 30.0, 5.0, 50.0];
        let scaler = StandardScaler::fit(&values, 2);

        let mut scaled = values.clone();
        scaler.transform(&mut scaled);
        assert!((scaled[0] + 1.2247449).abs() < 1e-5);
        assert!(scaled[2].abs() < 1e-6);

        scaler.inverse_transform(&mut scaled);
        for (a, b) in scaled.iter().zip(&values) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_constant_channel_scales_with_unit_std() {
        let scaler = StandardScaler::fit(&[2.0, 2.0, 2.0], 1);
        let mut v = vec![3.0];
        scaler.transform(&mut v);
        assert_eq!(v, vec![1.0]);
    }

    #[test]
    fn test_loader_batching_rules() {
        let file = write_csv(100);
        let config = config_for(&file);

        let mut train = data_provider(&config, Split::Train).unwrap();
        // 61 windows, batch 4, drop_last
        assert_eq!(train.len(), 15);
        let batches: Vec<Batch> = train
            .iter(&Device::Cpu)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.len(), 15);
        assert_eq!(batches[0].x.dims(), &[4, 8, 3]);
        assert_eq!(batches[0].y.dims(), &[4, 6, 3]);

        let mut test = data_provider(&config, Split::Test).unwrap();
        // 28 rows - 8 - 2 + 1 = 19 windows, keep the partial batch
        assert_eq!(test.len(), 5);
        let last = test.iter(&Device::Cpu).last().unwrap().unwrap();
        assert_eq!(last.batch_size(), 3);

        let pred = data_provider(&config, Split::Pred).unwrap();
        assert_eq!(pred.len(), 1);
    }

    #[test]
    fn test_test_loader_is_ordered() {
        let file = write_csv(100);
        let config = config_for(&file);
        let mut test = data_provider(&config, Split::Test).unwrap();

        let first = test.iter(&Device::Cpu).next().unwrap().unwrap();
        let x = first.x.to_vec3::<f32>().unwrap();
        assert_eq!(x[0][0][0], 72.0);
        assert_eq!(x[1][0][0], 73.0);
    }

    #[test]
    fn test_missing_date_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "time,a\n2020-01-01,1").unwrap();
        assert!(TimeSeriesFrame::from_csv(file.path()).is_err());
    }
}
