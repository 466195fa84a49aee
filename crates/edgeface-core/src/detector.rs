//! Face detection seam.
//!
//! The recognition loop only sees [`FaceDetector`] and the rectangles it
//! returns. [`SeetaDetector`] implements it with the SeetaFace funnel
//! cascade from `rustface`.

use crate::types::FaceRect;
use image::GrayImage;
use rustface::ImageData;
use std::path::PathBuf;
use thiserror::Error;

// --- Named constants ---
const SEETA_MIN_FACE_SIZE: u32 = 20;
const SEETA_WINDOW_STEP: u32 = 4;
/// Score threshold contributed by each required neighbor; 5 neighbors → 2.0.
const SEETA_SCORE_PER_NEIGHBOR: f64 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade model not found: {0} — set EDGEFACE_MODEL_DIR or face.cascade")]
    ModelNotFound(String),
    #[error("failed to load cascade model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
}

/// Detector settings, forwarded untouched from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    /// Cascade model file.
    pub cascade: PathBuf,
    /// Image pyramid growth per level, greater than 1.
    pub scale_factor: f32,
    /// Detection strictness; higher rejects more weak candidates.
    pub min_neighbors: u32,
}

/// Finds face rectangles in a grayscale frame.
pub trait FaceDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<FaceRect>, DetectorError>;
}

/// SeetaFace cascade detector.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
}

impl SeetaDetector {
    pub fn load(params: &DetectorParams) -> Result<Self, DetectorError> {
        if !params.cascade.exists() {
            return Err(DetectorError::ModelNotFound(
                params.cascade.display().to_string(),
            ));
        }
        let pyramid = pyramid_scale(params.scale_factor)?;
        let threshold = score_threshold(params.min_neighbors);

        let path = params.cascade.to_string_lossy().into_owned();
        let mut inner =
            rustface::create_detector(&path).map_err(|e| DetectorError::ModelLoad {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        inner.set_min_face_size(SEETA_MIN_FACE_SIZE);
        inner.set_slide_window_step(SEETA_WINDOW_STEP, SEETA_WINDOW_STEP);
        inner.set_pyramid_scale_factor(pyramid);
        inner.set_score_thresh(threshold);

        tracing::info!(
            path = %path,
            pyramid_scale = pyramid,
            score_threshold = threshold,
            "loaded SeetaFace cascade"
        );

        Ok(Self { inner })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<FaceRect>, DetectorError> {
        let image = ImageData::new(gray.as_raw(), gray.width(), gray.height());
        let faces = self.inner.detect(&image);

        let rects: Vec<FaceRect> = faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceRect::new(bbox.x(), bbox.y(), bbox.width(), bbox.height())
            })
            .collect();

        tracing::trace!(count = rects.len(), "faces detected");
        Ok(rects)
    }
}

/// Convert an upward scale factor (e.g. 1.25) into rustface's
/// downscaling pyramid factor (0.8).
fn pyramid_scale(scale_factor: f32) -> Result<f32, DetectorError> {
    if !(scale_factor > 1.0) || !scale_factor.is_finite() {
        return Err(DetectorError::InvalidParams(format!(
            "scale_factor must be a finite value greater than 1, got {scale_factor}"
        )));
    }
    Ok(1.0 / scale_factor)
}

fn score_threshold(min_neighbors: u32) -> f64 {
    f64::from(min_neighbors) * SEETA_SCORE_PER_NEIGHBOR
}
