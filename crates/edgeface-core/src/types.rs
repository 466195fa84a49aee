use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle reported by a detector, in frame pixels.
///
/// `x`/`y` may be negative or the rectangle may extend past the frame edge;
/// consumers clamp before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `(x, y, width, height)` in unsigned frame coordinates, or
    /// `None` when nothing of the rectangle lies inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = i64::from(self.x).max(0);
        let y0 = i64::from(self.y).max(0);
        let x1 = (i64::from(self.x) + i64::from(self.width)).min(i64::from(frame_width));
        let y1 = (i64::from(self.y) + i64::from(self.height)).min(i64::from(frame_height));

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Target size every face crop is resized to before flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct FaceSize {
    pub width: u32,
    pub height: u32,
}

impl FaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Length of a flattened RGB feature vector at this size.
    pub fn feature_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl From<[u32; 2]> for FaceSize {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<FaceSize> for [u32; 2] {
    fn from(size: FaceSize) -> Self {
        [size.width, size.height]
    }
}

/// Best-guess identity for one feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Share of the neighborhood's vote won by `label`, in [0, 1].
    pub confidence: f64,
    /// Euclidean distance to the closest neighbor carrying `label`.
    pub nearest_distance: f64,
}

/// Euclidean distance between two raw intensity vectors.
///
/// The squared sum is accumulated as an integer so equal inputs always
/// produce bit-identical distances.
pub fn euclidean_distance(a: &[u8], b: &[u8]) -> f64 {
    let squared: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = i64::from(x) - i64::from(y);
            (d * d) as u64
        })
        .sum();
    (squared as f64).sqrt()
}
