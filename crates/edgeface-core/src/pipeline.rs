//! Frame-by-frame recognition loop.
//!
//! A [`RecognitionLoop`] is built for exactly one mode and one run:
//!
//! - **Collect** samples every `sample_stride`-th frame into an in-memory
//!   batch and persists the batch only once the quota is reached.
//! - **Recognize** classifies every detected face until the stream ends or
//!   the user cancels.
//!
//! The loop is synchronous: one frame is fetched, detected, processed,
//! shown and polled for cancellation before the next one is requested.

use crate::classifier::{Classifier, ClassifierError};
use crate::config::ConfigError;
use crate::dataset::{DatasetError, SampleStore};
use crate::detector::{DetectorError, FaceDetector};
use crate::features;
use crate::types::{FaceRect, FaceSize, Prediction};
use image::RgbImage;
use ndarray::Array2;
use thiserror::Error;

/// Identity shown for faces rejected by the distance gate.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no faces collected; nothing was saved")]
    EmptyCollection,
    #[error("recognition loop is no longer running")]
    NotRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("display error: {0}")]
    Display(#[from] DisplayError),
    #[error("sample batch shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// A frame could not be read from the capture source.
#[derive(Error, Debug)]
#[error("frame capture failed: {0}")]
pub struct CaptureError(pub String);

/// The display could not render a frame.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct DisplayError(pub String);

/// Supplies color frames, one per call. Blocks until a frame is available.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Renders annotated frames and reports user cancellation.
pub trait FrameDisplay {
    fn show(&mut self, frame: &RgbImage, state: &FrameAnnotationState) -> Result<(), DisplayError>;

    /// Polled once per frame, after [`show`](Self::show).
    fn cancel_requested(&mut self) -> bool;
}

/// Parameters shared by both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub face_size: FaceSize,
    pub samples_per_person: usize,
    pub sample_stride: u64,
}

impl LoopSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.face_size.width == 0 || self.face_size.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "face size must be positive, got {}x{}",
                self.face_size.width, self.face_size.height
            )));
        }
        if self.samples_per_person == 0 {
            return Err(ConfigError::Invalid(
                "samples_per_person must be at least 1".into(),
            ));
        }
        if self.sample_stride == 0 {
            return Err(ConfigError::Invalid("sample_stride must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Cancelled,
    Done,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    QuotaReached,
    Cancelled,
    StreamEnded,
}

/// Overlay for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub rect: FaceRect,
    pub text: String,
    /// Recognize mode: identity after the distance gate.
    pub identity: Option<String>,
    /// Recognize mode: the classifier's raw answer.
    pub prediction: Option<Prediction>,
}

/// Collect mode progress, as shown on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectProgress {
    pub collected: usize,
    pub quota: usize,
}

/// Everything the display needs for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnnotationState {
    pub frame_index: u64,
    pub annotations: Vec<Annotation>,
    pub progress: Option<CollectProgress>,
}

/// Summary returned when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub termination: Termination,
    /// Samples in the batch at the end (always 0 in Recognize mode).
    pub collected: usize,
    /// Whether the batch was appended to the store.
    pub persisted: bool,
}

enum Mode<'a> {
    Collect {
        label: String,
        store: &'a mut dyn SampleStore,
        batch: Vec<Vec<u8>>,
    },
    Recognize {
        classifier: &'a dyn Classifier,
        unknown_distance: Option<f64>,
    },
}

pub struct RecognitionLoop<'a> {
    mode: Mode<'a>,
    settings: LoopSettings,
    state: LoopState,
    termination: Option<Termination>,
    frame_index: u64,
}

impl<'a> RecognitionLoop<'a> {
    /// Loop that collects `settings.samples_per_person` faces for `label`.
    pub fn collect(
        label: impl Into<String>,
        store: &'a mut dyn SampleStore,
        settings: LoopSettings,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;
        let label = label.into();
        if label.trim().is_empty() {
            return Err(DatasetError::EmptyLabel.into());
        }
        Ok(Self::new(
            Mode::Collect {
                label,
                store,
                batch: Vec::with_capacity(settings.samples_per_person),
            },
            settings,
        ))
    }

    /// Loop that labels faces with `classifier`.
    ///
    /// With `unknown_distance` set, a face whose nearest matching sample is
    /// farther away is shown as [`UNKNOWN_LABEL`].
    pub fn recognize(
        classifier: &'a dyn Classifier,
        unknown_distance: Option<f64>,
        settings: LoopSettings,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self::new(
            Mode::Recognize {
                classifier,
                unknown_distance,
            },
            settings,
        ))
    }

    fn new(mode: Mode<'a>, settings: LoopSettings) -> Self {
        Self {
            mode,
            settings,
            state: LoopState::Running,
            termination: None,
            frame_index: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Samples collected so far (0 in Recognize mode).
    pub fn collected(&self) -> usize {
        match &self.mode {
            Mode::Collect { batch, .. } => batch.len(),
            Mode::Recognize { .. } => 0,
        }
    }

    /// Process one frame and its detected faces.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        rects: &[FaceRect],
    ) -> Result<FrameAnnotationState, PipelineError> {
        if self.state != LoopState::Running {
            return Err(PipelineError::NotRunning);
        }

        let frame_index = self.frame_index;
        let size = self.settings.face_size;
        let mut annotations = Vec::with_capacity(rects.len());

        let progress = match &mut self.mode {
            Mode::Collect { batch, .. } => {
                let quota = self.settings.samples_per_person;
                let sampling = frame_index % self.settings.sample_stride == 0;

                for rect in rects {
                    if sampling && batch.len() < quota {
                        if let Some(vector) = features::extract(frame, rect, size) {
                            batch.push(vector);
                            tracing::debug!(
                                frame = frame_index,
                                collected = batch.len(),
                                quota,
                                "sample captured"
                            );
                        }
                    }
                    annotations.push(Annotation {
                        rect: *rect,
                        text: format!("Collected: {}/{}", batch.len(), quota),
                        identity: None,
                        prediction: None,
                    });
                }

                if batch.len() >= quota {
                    self.state = LoopState::Done;
                    self.termination = Some(Termination::QuotaReached);
                }
                Some(CollectProgress {
                    collected: batch.len(),
                    quota,
                })
            }
            Mode::Recognize {
                classifier,
                unknown_distance,
            } => {
                for rect in rects {
                    let Some(vector) = features::extract(frame, rect, size) else {
                        continue;
                    };
                    let prediction = classifier.predict(&vector)?;
                    let identity = match unknown_distance {
                        Some(limit) if prediction.nearest_distance > *limit => {
                            UNKNOWN_LABEL.to_string()
                        }
                        _ => prediction.label.clone(),
                    };

                    tracing::debug!(
                        frame = frame_index,
                        identity = %identity,
                        confidence = prediction.confidence,
                        distance = prediction.nearest_distance,
                        "face recognized"
                    );

                    annotations.push(Annotation {
                        rect: *rect,
                        text: format!("{identity} ({:.0}%)", prediction.confidence * 100.0),
                        identity: Some(identity),
                        prediction: Some(prediction),
                    });
                }
                None
            }
        };

        self.frame_index += 1;

        Ok(FrameAnnotationState {
            frame_index,
            annotations,
            progress,
        })
    }

    /// Drive the loop to completion.
    ///
    /// A failed frame read ends the stream without an error. Detector,
    /// classifier, display and store errors abort the run.
    pub fn run<S, D, V>(
        mut self,
        source: &mut S,
        detector: &mut D,
        display: &mut V,
    ) -> Result<LoopReport, PipelineError>
    where
        S: FrameSource + ?Sized,
        D: FaceDetector + ?Sized,
        V: FrameDisplay + ?Sized,
    {
        while self.state == LoopState::Running {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, frame = self.frame_index, "frame read failed; stopping");
                    self.state = LoopState::Done;
                    self.termination = Some(Termination::StreamEnded);
                    break;
                }
            };

            let gray = features::to_grayscale(&frame);
            let rects = detector.detect(&gray)?;
            let annotations = self.process_frame(&frame, &rects)?;
            display.show(&frame, &annotations)?;

            if display.cancel_requested() && self.state == LoopState::Running {
                tracing::warn!(frame = self.frame_index, "cancelled by user");
                self.state = LoopState::Cancelled;
                self.termination = Some(Termination::Cancelled);
            }
        }

        self.finish()
    }

    /// Persist the batch unless the user cancelled, and produce the report.
    fn finish(mut self) -> Result<LoopReport, PipelineError> {
        let termination = self.termination.unwrap_or(Termination::StreamEnded);
        let frames = self.frame_index;
        self.state = LoopState::Done;

        let (collected, persisted) = match &mut self.mode {
            Mode::Collect {
                label,
                store,
                batch,
            } => {
                let collected = batch.len();
                if collected == 0 {
                    return Err(PipelineError::EmptyCollection);
                }

                if termination != Termination::Cancelled {
                    let dimension = batch[0].len();
                    let rows = Array2::from_shape_vec((collected, dimension), batch.concat())?;
                    store.append(rows.view(), label)?;
                    tracing::info!(
                        label = %label,
                        samples = collected,
                        ?termination,
                        "collection saved"
                    );
                    (collected, true)
                } else {
                    tracing::warn!(
                        label = %label,
                        collected,
                        quota = self.settings.samples_per_person,
                        ?termination,
                        "collection cancelled; partial batch discarded"
                    );
                    (collected, false)
                }
            }
            Mode::Recognize { .. } => (0, false),
        };

        Ok(LoopReport {
            frames,
            termination,
            collected,
            persisted,
        })
    }
}
