//! edgeface-core — Face sample storage, k-NN recognition and the frame loop.
//!
//! Faces are represented by their raw pixels: each detected face is cropped,
//! resized to a fixed size and flattened. Collected vectors are stored per
//! person and matched with a k-nearest-neighbor vote at recognition time.

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod features;
pub mod pipeline;
pub mod types;

pub use classifier::{Classifier, ClassifierError, KnnClassifier, KnnModel, Weighting};
pub use config::{Config, ConfigError};
pub use dataset::{Dataset, DatasetError, MemoryStore, NpyStore, SampleStore};
pub use detector::{DetectorError, DetectorParams, FaceDetector, SeetaDetector};
pub use pipeline::{
    CaptureError, DisplayError, FrameAnnotationState, FrameDisplay, FrameSource, LoopReport,
    LoopSettings, PipelineError, RecognitionLoop, Termination,
};
pub use types::{FaceRect, FaceSize, Prediction};
