//! Console display: logs overlays, optionally writes an annotated preview
//! image, and reports Ctrl-C as the cancel signal.

use edgeface_core::pipeline::{Annotation, UNKNOWN_LABEL};
use edgeface_core::{DisplayError, FaceRect, FrameAnnotationState, FrameDisplay};
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const BOX_THICKNESS: u32 = 2;
const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

pub struct ConsoleDisplay {
    cancel: Arc<AtomicBool>,
    preview: Option<PathBuf>,
    last_summary: String,
}

impl ConsoleDisplay {
    pub fn new(cancel: Arc<AtomicBool>, preview: Option<PathBuf>) -> Self {
        if let Some(path) = &preview {
            tracing::info!(path = %path.display(), "writing annotated preview frames");
        }
        Self {
            cancel,
            preview,
            last_summary: String::new(),
        }
    }
}

impl FrameDisplay for ConsoleDisplay {
    fn show(&mut self, frame: &RgbImage, state: &FrameAnnotationState) -> Result<(), DisplayError> {
        // Only log when the overlay text changes, not on every frame.
        let summary = summarize(state);
        if !summary.is_empty() && summary != self.last_summary {
            tracing::info!(frame = state.frame_index, "{summary}");
        }
        self.last_summary = summary;

        if let Some(path) = &self.preview {
            let mut canvas = frame.clone();
            for annotation in &state.annotations {
                draw_box(&mut canvas, &annotation.rect, color_for(annotation));
            }
            canvas
                .save(path)
                .map_err(|e| DisplayError(format!("preview {}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn cancel_requested(&mut self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

fn summarize(state: &FrameAnnotationState) -> String {
    state
        .annotations
        .iter()
        .map(|a| a.text.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn color_for(annotation: &Annotation) -> Rgb<u8> {
    match annotation.identity.as_deref() {
        Some(UNKNOWN_LABEL) => UNKNOWN_COLOR,
        _ => KNOWN_COLOR,
    }
}

/// Draw a hollow rectangle, clipped to the image.
fn draw_box(canvas: &mut RgbImage, rect: &FaceRect, color: Rgb<u8>) {
    let Some((x, y, width, height)) = rect.clamp_to(canvas.width(), canvas.height()) else {
        return;
    };
    let (x1, y1) = (x + width, y + height);

    for py in y..y1 {
        for px in x..x1 {
            let on_edge = px < x + BOX_THICKNESS
                || px + BOX_THICKNESS >= x1
                || py < y + BOX_THICKNESS
                || py + BOX_THICKNESS >= y1;
            if on_edge {
                canvas.put_pixel(px, py, color);
            }
        }
    }
}
