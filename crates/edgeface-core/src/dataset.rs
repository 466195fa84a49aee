//! Labeled face sample storage.
//!
//! A dataset is two co-indexed arrays: a `u8` matrix with one flattened
//! face per row, and one label string per row. Stores only ever grow by
//! appending and are always read back whole.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, WriteNpyError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const VECTORS_FILE: &str = "faces.npy";
const LABELS_FILE: &str = "labels.json";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    ReadNpy {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },
    #[error("failed to write {path}: {source}")]
    WriteNpy {
        path: PathBuf,
        #[source]
        source: WriteNpyError,
    },
    #[error("label file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset is corrupt: {0}")]
    Corrupt(String),
    #[error("sample length mismatch: dataset stores {expected} values per face, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("sample label must not be empty")]
    EmptyLabel,
}

/// Every stored sample, in append order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub vectors: Array2<u8>,
    pub labels: Vec<String>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dataset {
    pub fn empty() -> Self {
        Self {
            vectors: Array2::zeros((0, 0)),
            labels: Vec::new(),
        }
    }

    /// Build a dataset from parts, checking the row/label invariant.
    pub fn from_parts(vectors: Array2<u8>, labels: Vec<String>) -> Result<Self, DatasetError> {
        if vectors.nrows() != labels.len() {
            return Err(DatasetError::Corrupt(format!(
                "{} sample rows but {} labels",
                vectors.nrows(),
                labels.len()
            )));
        }
        Ok(Self { vectors, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Values per sample, or `None` for an empty dataset.
    pub fn dimension(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.vectors.ncols())
    }

    /// Sample count per enrolled label, sorted by label.
    pub fn individuals(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Append `vectors` under `label`. Zero rows leaves the dataset untouched.
    pub fn extend(&mut self, vectors: ArrayView2<'_, u8>, label: &str) -> Result<(), DatasetError> {
        if vectors.nrows() == 0 {
            return Ok(());
        }
        if label.is_empty() {
            return Err(DatasetError::EmptyLabel);
        }

        if self.is_empty() {
            self.vectors = vectors.to_owned();
        } else {
            let expected = self.vectors.ncols();
            if vectors.ncols() != expected {
                return Err(DatasetError::DimensionMismatch {
                    expected,
                    actual: vectors.ncols(),
                });
            }
            self.vectors = concatenate(Axis(0), &[self.vectors.view(), vectors.view()])
                .map_err(|e| DatasetError::Corrupt(format!("concatenate failed: {e}")))?;
        }

        self.labels
            .extend(std::iter::repeat(label.to_string()).take(vectors.nrows()));
        Ok(())
    }
}

/// Append-only persistence for labeled samples.
pub trait SampleStore {
    /// Append every row of `vectors` under `label` and persist.
    fn append(&mut self, vectors: ArrayView2<'_, u8>, label: &str) -> Result<(), DatasetError>;

    /// Load the full dataset. A store that was never written loads empty.
    fn load(&self) -> Result<Dataset, DatasetError>;
}

/// Dataset kept on disk as `faces.npy` plus `labels.json` in one directory.
///
/// Each append rewrites both files in place. There is no locking and no
/// crash recovery: exactly one process may write a given directory, and a
/// crash between the two writes can leave the files out of step (reported
/// as [`DatasetError::Corrupt`] on the next load).
#[derive(Debug, Clone)]
pub struct NpyStore {
    dir: PathBuf,
}

impl NpyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    fn write(&self, dataset: &Dataset) -> Result<(), DatasetError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| DatasetError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let vectors_path = self.vectors_path();
        write_npy(&vectors_path, &dataset.vectors).map_err(|source| DatasetError::WriteNpy {
            path: vectors_path.clone(),
            source,
        })?;

        let labels_path = self.labels_path();
        let json = serde_json::to_vec(&dataset.labels).map_err(|source| DatasetError::Json {
            path: labels_path.clone(),
            source,
        })?;
        std::fs::write(&labels_path, json).map_err(|source| DatasetError::Io {
            path: labels_path.clone(),
            source,
        })?;

        tracing::debug!(
            dir = %self.dir.display(),
            samples = dataset.len(),
            "dataset written"
        );
        Ok(())
    }
}

impl SampleStore for NpyStore {
    fn append(&mut self, vectors: ArrayView2<'_, u8>, label: &str) -> Result<(), DatasetError> {
        if vectors.nrows() == 0 {
            return Ok(());
        }

        let mut dataset = self.load()?;
        dataset.extend(vectors, label)?;
        self.write(&dataset)?;

        tracing::info!(
            label,
            added = vectors.nrows(),
            total = dataset.len(),
            dir = %self.dir.display(),
            "samples appended"
        );
        Ok(())
    }

    fn load(&self) -> Result<Dataset, DatasetError> {
        let vectors_path = self.vectors_path();
        let labels_path = self.labels_path();

        if !vectors_path.exists() && !labels_path.exists() {
            tracing::debug!(dir = %self.dir.display(), "no dataset on disk yet");
            return Ok(Dataset::empty());
        }

        let vectors: Array2<u8> =
            read_npy(&vectors_path).map_err(|source| DatasetError::ReadNpy {
                path: vectors_path.clone(),
                source,
            })?;

        let raw = std::fs::read(&labels_path).map_err(|source| DatasetError::Io {
            path: labels_path.clone(),
            source,
        })?;
        let labels: Vec<String> =
            serde_json::from_slice(&raw).map_err(|source| DatasetError::Json {
                path: labels_path.clone(),
                source,
            })?;

        Dataset::from_parts(vectors, labels)
    }
}

/// In-process store with the same contract as [`NpyStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    dataset: Dataset,
    appends: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `dataset`.
    pub fn with_dataset(dataset: Dataset) -> Self {
        Self { dataset, appends: 0 }
    }

    /// Number of non-empty `append` calls so far.
    pub fn append_calls(&self) -> usize {
        self.appends
    }
}

impl SampleStore for MemoryStore {
    fn append(&mut self, vectors: ArrayView2<'_, u8>, label: &str) -> Result<(), DatasetError> {
        if vectors.nrows() == 0 {
            return Ok(());
        }
        self.dataset.extend(vectors, label)?;
        self.appends += 1;
        Ok(())
    }

    fn load(&self) -> Result<Dataset, DatasetError> {
        Ok(self.dataset.clone())
    }
}
