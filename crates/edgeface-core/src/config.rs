//! Runtime configuration, loaded from TOML.
//!
//! The packaged default (`default.toml`) is compiled into the binary; a user
//! file given with `--config` only needs the keys it changes. After parsing,
//! `EDGEFACE_*` environment variables override the camera device, data
//! directory and model directory.

use crate::classifier::Weighting;
use crate::detector::DetectorParams;
use crate::pipeline::LoopSettings;
use crate::types::FaceSize;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PACKAGED_DEFAULT: &str = include_str!("../default.toml");
const PACKAGED_DEFAULT_NAME: &str = "default.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config not found at '{}': provide a valid file path or omit --config to use default settings", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            warmup_frames: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub cascade: PathBuf,
    pub scale_factor: f32,
    pub min_neighbors: u32,
    pub size: FaceSize,
    pub samples_per_person: usize,
    pub sample_stride: u64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            cascade: PathBuf::from("seeta_fd_frontal_v1.0.bin"),
            scale_factor: 1.25,
            min_neighbors: 5,
            size: FaceSize::new(50, 50),
            samples_per_person: 100,
            sample_stride: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    pub k: usize,
    pub weights: Weighting,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: 5,
            weights: Weighting::Distance,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Nearest-sample distance above which a face is reported as unknown.
    pub unknown_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub preview: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            preview: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub face: FaceConfig,
    pub knn: KnnConfig,
    pub recognition: RecognitionConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load, apply environment overrides, resolve paths and validate.
    ///
    /// - `None` loads the packaged default.
    /// - An existing file is parsed.
    /// - A missing file named `default.toml` falls back to the packaged default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            None => Self::packaged_default()?,
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) if p.file_name() == Some(OsStr::new(PACKAGED_DEFAULT_NAME)) => {
                Self::packaged_default()?
            }
            Some(p) => return Err(ConfigError::NotFound(p.to_path_buf())),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn packaged_default() -> Result<Self, ConfigError> {
        Self::parse(PACKAGED_DEFAULT, "packaged default.toml")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    fn parse(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Apply `EDGEFACE_*` overrides from `lookup` and resolve the cascade path.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("EDGEFACE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(dir) = lookup("EDGEFACE_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }

        // A bare model name that does not exist as given lives in the model dir.
        if self.face.cascade.is_relative() && !self.face.cascade.exists() {
            self.face.cascade = model_dir(&lookup).join(&self.face.cascade);
        }
    }

    /// Reject hyperparameters the core cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.knn.k == 0 {
            return Err(ConfigError::Invalid("knn.k must be at least 1".into()));
        }
        if self.face.samples_per_person == 0 {
            return Err(ConfigError::Invalid(
                "face.samples_per_person must be at least 1".into(),
            ));
        }
        if self.face.sample_stride == 0 {
            return Err(ConfigError::Invalid(
                "face.sample_stride must be at least 1".into(),
            ));
        }
        if self.face.size.width == 0 || self.face.size.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "face.size must be positive, got [{}, {}]",
                self.face.size.width, self.face.size.height
            )));
        }
        if !(self.face.scale_factor > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "face.scale_factor must be greater than 1, got {}",
                self.face.scale_factor
            )));
        }
        if let Some(threshold) = self.recognition.unknown_distance {
            if !(threshold > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "recognition.unknown_distance must be positive, got {threshold}"
                )));
            }
        }
        Ok(())
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            cascade: self.face.cascade.clone(),
            scale_factor: self.face.scale_factor,
            min_neighbors: self.face.min_neighbors,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            face_size: self.face.size,
            samples_per_person: self.face.samples_per_person,
            sample_stride: self.face.sample_stride,
        }
    }
}

/// `$EDGEFACE_MODEL_DIR`, else `$XDG_DATA_HOME/edgeface/models`,
/// else `~/.local/share/edgeface/models`.
fn model_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = lookup("EDGEFACE_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("edgeface")
        .join("models")
}
