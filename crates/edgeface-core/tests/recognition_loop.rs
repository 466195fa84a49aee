use edgeface_core::pipeline::{CollectProgress, LoopState};
use edgeface_core::{
    CaptureError, ClassifierError, Dataset, DetectorError, DisplayError, FaceDetector, FaceRect,
    FaceSize, FrameAnnotationState, FrameDisplay, FrameSource, KnnClassifier, LoopSettings,
    MemoryStore, NpyStore, PipelineError, RecognitionLoop, SampleStore, Termination, Weighting,
};
use image::{GrayImage, Rgb, RgbImage};
use ndarray::Array2;

const FACE: FaceRect = FaceRect {
    x: 4,
    y: 4,
    width: 8,
    height: 8,
};

/// Yields `remaining` copies of one frame, then fails like an unplugged camera.
struct ScriptedSource {
    frame: RgbImage,
    remaining: usize,
}

impl ScriptedSource {
    fn solid(value: u8, frames: usize) -> Self {
        Self {
            frame: RgbImage::from_pixel(16, 16, Rgb([value, value, value])),
            remaining: frames,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if self.remaining == 0 {
            return Err(CaptureError("end of script".into()));
        }
        self.remaining -= 1;
        Ok(self.frame.clone())
    }
}

/// Reports the same rectangles for every frame.
struct FixedDetector(Vec<FaceRect>);

impl FaceDetector for FixedDetector {
    fn detect(&mut self, _gray: &GrayImage) -> Result<Vec<FaceRect>, DetectorError> {
        Ok(self.0.clone())
    }
}

/// Records every shown frame; cancels once `cancel_at` samples are collected
/// or after `cancel_after_frames` frames.
#[derive(Default)]
struct RecordingDisplay {
    shown: Vec<FrameAnnotationState>,
    cancel_at: Option<usize>,
    cancel_after_frames: Option<usize>,
}

impl FrameDisplay for RecordingDisplay {
    fn show(&mut self, _frame: &RgbImage, state: &FrameAnnotationState) -> Result<(), DisplayError> {
        self.shown.push(state.clone());
        Ok(())
    }

    fn cancel_requested(&mut self) -> bool {
        let collected = self
            .shown
            .last()
            .and_then(|s| s.progress)
            .map(|p| p.collected);
        let by_samples = matches!((self.cancel_at, collected), (Some(at), Some(n)) if n >= at);
        let by_frames = self
            .cancel_after_frames
            .is_some_and(|limit| self.shown.len() >= limit);
        by_samples || by_frames
    }
}

fn settings(quota: usize) -> LoopSettings {
    LoopSettings {
        face_size: FaceSize::new(4, 4),
        samples_per_person: quota,
        sample_stride: 10,
    }
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn collect_reaches_quota_on_stride_frames() {
    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 30);
    let mut detector = FixedDetector(vec![FACE]);
    let mut display = RecordingDisplay::default();

    let report = RecognitionLoop::collect("Alice", &mut store, settings(3))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap();

    assert_eq!(report.termination, Termination::QuotaReached);
    assert_eq!(report.collected, 3);
    assert!(report.persisted);
    // Samples come from frames 0, 10 and 20; the loop stops right after.
    assert_eq!(report.frames, 21);
    assert_eq!(display.shown.len(), 21);
    assert_eq!(
        display.shown.last().and_then(|s| s.progress),
        Some(CollectProgress {
            collected: 3,
            quota: 3
        })
    );

    assert_eq!(store.append_calls(), 1);
    let dataset = store.load().unwrap();
    assert_eq!(dataset.vectors.dim(), (3, FaceSize::new(4, 4).feature_len()));
    assert_eq!(dataset.labels, labels(&["Alice", "Alice", "Alice"]));
    assert!(dataset.vectors.iter().all(|&v| v == 90));
}

#[test]
fn collect_cancel_discards_partial_batch() {
    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 100);
    let mut detector = FixedDetector(vec![FACE]);
    let mut display = RecordingDisplay {
        cancel_at: Some(2),
        ..Default::default()
    };

    let report = RecognitionLoop::collect("Alice", &mut store, settings(5))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap();

    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.collected, 2);
    assert!(!report.persisted);
    assert_eq!(store.append_calls(), 0);
    assert!(store.load().unwrap().is_empty());
}

#[test]
fn collect_cancel_before_any_sample_is_empty_collection() {
    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 100);
    // No faces: nothing is ever sampled.
    let mut detector = FixedDetector(vec![]);
    let mut display = RecordingDisplay {
        cancel_after_frames: Some(3),
        ..Default::default()
    };

    let err = RecognitionLoop::collect("Alice", &mut store, settings(5))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap_err();

    assert!(matches!(err, PipelineError::EmptyCollection));
    assert_eq!(display.shown.len(), 3);
    assert_eq!(store.append_calls(), 0);
}

#[test]
fn collect_stream_end_with_partial_batch_persists_it() {
    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 15);
    let mut detector = FixedDetector(vec![FACE]);
    let mut display = RecordingDisplay::default();

    let report = RecognitionLoop::collect("Alice", &mut store, settings(5))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap();

    // Frames 0 and 10 were sampled before the camera stopped delivering.
    assert_eq!(report.termination, Termination::StreamEnded);
    assert_eq!(report.collected, 2);
    assert!(report.persisted);
    assert_eq!(store.append_calls(), 1);

    let dataset = store.load().unwrap();
    assert_eq!(dataset.vectors.nrows(), 2);
    assert_eq!(dataset.labels, labels(&["Alice", "Alice"]));
}

#[test]
fn collect_stream_end_without_samples_is_empty_collection() {
    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 0);
    let mut detector = FixedDetector(vec![FACE]);
    let mut display = RecordingDisplay::default();

    let err = RecognitionLoop::collect("Alice", &mut store, settings(3))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap_err();

    assert!(matches!(err, PipelineError::EmptyCollection));
    assert!(display.shown.is_empty());
}

#[test]
fn collect_appends_to_existing_store_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = NpyStore::new(dir.path().join("data"));

    for (name, value) in [("Alice", 30u8), ("Bob", 200u8)] {
        let mut source = ScriptedSource::solid(value, 30);
        let mut detector = FixedDetector(vec![FACE]);
        let mut display = RecordingDisplay::default();
        RecognitionLoop::collect(name, &mut store, settings(2))
            .unwrap()
            .run(&mut source, &mut detector, &mut display)
            .unwrap();
    }

    let dataset = NpyStore::new(dir.path().join("data")).load().unwrap();
    assert_eq!(dataset.labels, labels(&["Alice", "Alice", "Bob", "Bob"]));
    assert_eq!(dataset.vectors.nrows(), 4);
}

fn clustered_model(k: usize, weighting: Weighting) -> edgeface_core::KnnModel {
    let dimension = FaceSize::new(4, 4).feature_len();
    let centers = [20u8, 21, 19, 230, 231, 229];
    let vectors = Array2::from_shape_fn((centers.len(), dimension), |(row, _)| centers[row]);
    let dataset = Dataset::from_parts(
        vectors,
        labels(&["Alice", "Alice", "Alice", "Bob", "Bob", "Bob"]),
    )
    .unwrap();
    KnnClassifier::new(k, weighting).unwrap().train(dataset).unwrap()
}

#[test]
fn recognize_labels_clustered_identities() {
    for weighting in [Weighting::Uniform, Weighting::Distance] {
        let model = clustered_model(3, weighting);

        for (value, expected) in [(20u8, "Alice"), (230u8, "Bob")] {
            let mut source = ScriptedSource::solid(value, 2);
            let mut detector = FixedDetector(vec![FACE]);
            let mut display = RecordingDisplay::default();

            let report = RecognitionLoop::recognize(&model, None, settings(1))
                .unwrap()
                .run(&mut source, &mut detector, &mut display)
                .unwrap();

            assert_eq!(report.termination, Termination::StreamEnded);
            assert_eq!(report.frames, 2);
            assert!(!report.persisted);
            for shown in &display.shown {
                assert_eq!(shown.annotations.len(), 1);
                assert_eq!(shown.annotations[0].identity.as_deref(), Some(expected));
            }
        }
    }
}

#[test]
fn recognize_runs_until_cancelled() {
    let model = clustered_model(3, Weighting::Distance);
    let mut source = ScriptedSource::solid(20, 1_000);
    let mut detector = FixedDetector(vec![FACE]);
    let mut display = RecordingDisplay {
        cancel_after_frames: Some(7),
        ..Default::default()
    };

    let report = RecognitionLoop::recognize(&model, None, settings(1))
        .unwrap()
        .run(&mut source, &mut detector, &mut display)
        .unwrap();

    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.frames, 7);
}

#[test]
fn recognize_with_empty_dataset_fails_before_predicting() {
    let store = MemoryStore::new();
    let knn = KnnClassifier::new(3, Weighting::Distance).unwrap();

    let err = knn.train(store.load().unwrap()).unwrap_err();
    assert!(matches!(err, ClassifierError::EmptyDataset));
}

#[test]
fn detector_failure_aborts_run() {
    struct BrokenDetector;
    impl FaceDetector for BrokenDetector {
        fn detect(&mut self, _gray: &GrayImage) -> Result<Vec<FaceRect>, DetectorError> {
            Err(DetectorError::InvalidParams("broken".into()))
        }
    }

    let mut store = MemoryStore::new();
    let mut source = ScriptedSource::solid(90, 30);
    let mut display = RecordingDisplay::default();

    let err = RecognitionLoop::collect("Alice", &mut store, settings(3))
        .unwrap()
        .run(&mut source, &mut BrokenDetector, &mut display)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Detector(_)));
    assert_eq!(store.append_calls(), 0);
}

#[test]
fn fresh_loop_starts_running() {
    let model = clustered_model(1, Weighting::Uniform);
    let pipeline = RecognitionLoop::recognize(&model, None, settings(1)).unwrap();
    assert_eq!(pipeline.state(), LoopState::Running);
    assert_eq!(pipeline.frame_index(), 0);
}
