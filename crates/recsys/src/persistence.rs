//! Model persistence
//!
//! Fitted models are stored as bincode blobs named after the model
//! (`<dir>/<model_name>.bin`). Dense ndarray matrices are stored through
//! [`StoredMatrix`] (shape + flat row-major data). The content-based index is
//! written to its own file (`<dir>/<model_name>_index.ann`) and restored
//! separately, see [`crate::content_based`].

use crate::error::{RecsysError, Result};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Serializable representation of a dense matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMatrix {
    pub shape: (usize, usize),
    pub data: Vec<f64>,
}

impl StoredMatrix {
    pub fn from_array(array: &Array2<f64>) -> Self {
        Self {
            shape: array.dim(),
            data: array.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<Array2<f64>> {
        Array2::from_shape_vec(self.shape, self.data.clone()).map_err(|e| {
            RecsysError::DataFormat(format!(
                "Failed to reconstruct {}x{} matrix: {}",
                self.shape.0, self.shape.1, e
            ))
        })
    }
}

/// Path of the state blob for `model_name`
pub fn state_path(dir: &Path, model_name: &str) -> PathBuf {
    dir.join(format!("{}.bin", model_name))
}

/// Path of the nearest-neighbor index file for `model_name`
pub fn index_path(dir: &Path, model_name: &str) -> PathBuf {
    dir.join(format!("{}_index.ann", model_name))
}

/// Serialize `value` to `path`, creating parent directories
pub fn write_blob<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let start = Instant::now();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, value)?;

    tracing::debug!("Wrote {} in {:?}", path.display(), start.elapsed());
    Ok(())
}

/// Deserialize a value previously written with [`write_blob`]
pub fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let start = Instant::now();

    let reader = BufReader::new(File::open(path)?);
    let value = bincode::deserialize_from(reader)?;

    tracing::debug!("Read {} in {:?}", path.display(), start.elapsed());
    Ok(value)
}

/// A fitted model that round-trips through a state blob
pub trait PersistentModel: Sized {
    /// File stem used for the state blob
    const MODEL_NAME: &'static str;

    type State: Serialize + DeserializeOwned;

    fn to_state(&self) -> Self::State;

    fn from_state(state: Self::State) -> Result<Self>;

    /// Save fitted state under `dir`, returning the written path
    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = state_path(dir, Self::MODEL_NAME);
        write_blob(&path, &self.to_state())?;
        tracing::info!("Saved {} model to {}", Self::MODEL_NAME, path.display());
        Ok(path)
    }

    /// Restore fitted state saved under `dir`
    fn load(dir: &Path) -> Result<Self> {
        let path = state_path(dir, Self::MODEL_NAME);
        let model = Self::from_state(read_blob(&path)?)?;
        tracing::info!("Loaded {} model from {}", Self::MODEL_NAME, path.display());
        Ok(model)
    }

    /// Whether a saved state blob exists under `dir`
    fn exists(dir: &Path) -> bool {
        state_path(dir, Self::MODEL_NAME).is_file()
    }
}
