//! Persistence of test metrics and forecast arrays.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use forecast_tools::Metrics;

use crate::error::Result;

/// Append one experiment entry to the result text file.
///
/// The entry is the setting line followed by
/// `mse:{}, mae:{}, rse:{}, corr:{}` and a blank line.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_result(path: impl AsRef<Path>, setting: &str, metrics: &Metrics) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write!(file, "{setting}  \n{metrics}\n\n")?;
    Ok(())
}

/// `<results>/<setting>/` directory of `.npy` outputs.
#[derive(Debug, Clone)]
pub struct ResultsDir {
    dir: PathBuf,
}

impl ResultsDir {
    /// Create (if needed) the directory for `setting` under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(root: impl AsRef<Path>, setting: &str) -> Result<Self> {
        let dir = root.as_ref().join(setting);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a tensor as `<name>.npy`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn save_tensor(&self, name: &str, tensor: &Tensor) -> Result<PathBuf> {
        let path = self.dir.join(format!("{name}.npy"));
        tensor.write_npy(&path)?;
        tracing::debug!("Saved {:?} to {}", tensor.dims(), path.display());
        Ok(path)
    }

    /// Write a flat buffer with the given shape as `<name>.npy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape does not match or writing fails.
    pub fn save_array(&self, name: &str, values: Vec<f32>, shape: &[usize]) -> Result<PathBuf> {
        let tensor = Tensor::from_vec(values, shape, &Device::Cpu)?;
        self.save_tensor(name, &tensor)
    }
}

/// Write a tensor to an arbitrary `.npy` path, creating parent directories.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn save_npy(path: impl AsRef<Path>, tensor: &Tensor) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    tensor.write_npy(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_metrics() -> Metrics {
        Metrics {
            mae: 0.5,
            mse: 0.25,
            rmse: 0.5,
            mape: 0.1,
            mspe: 0.01,
            rse: 0.75,
            corr: 0.9,
        }
    }

    #[test]
    fn test_append_result_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("result.txt");

        append_result(&path, "run_a", &sample_metrics()).unwrap();
        append_result(&path, "run_b", &sample_metrics()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "run_a  \nmse:0.25, mae:0.5, rse:0.75, corr:0.9\n\n\
             run_b  \nmse:0.25, mae:0.5, rse:0.75, corr:0.9\n\n"
        );
    }

    #[test]
    fn test_save_array_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let results = ResultsDir::create(tmp.path(), "setting").unwrap();

        let path = results
            .save_array("pred_test", vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2])
            .unwrap();
        let restored = Tensor::read_npy(&path).unwrap();
        assert_eq!(restored.dims(), &[1, 2, 2]);
        assert_eq!(
            restored.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_save_array_shape_mismatch() {
        let tmp = TempDir::new().unwrap();
        let results = ResultsDir::create(tmp.path(), "setting").unwrap();
        assert!(results.save_array("bad", vec![1.0, 2.0], &[3]).is_err());
    }
}
