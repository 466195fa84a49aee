//! Face crop feature extraction.
//!
//! Crops a detected face out of a color frame, resizes it to the shared
//! face size and flattens it into a row-major, channel-interleaved RGB
//! vector. Collect and Recognize modes both go through [`extract`], so
//! training and query vectors are always produced by the same transform.

use crate::types::{FaceRect, FaceSize};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Bilinear, to match what the stored samples were resized with.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Extract the feature vector for `rect` in `frame`.
///
/// Returns `None` when the rectangle lies entirely outside the frame.
pub fn extract(frame: &RgbImage, rect: &FaceRect, size: FaceSize) -> Option<Vec<u8>> {
    let (x, y, width, height) = rect.clamp_to(frame.width(), frame.height())?;

    let crop = imageops::crop_imm(frame, x, y, width, height).to_image();
    let resized = imageops::resize(&crop, size.width, size.height, RESIZE_FILTER);

    Some(resized.into_raw())
}

/// Grayscale view of a color frame, as consumed by face detectors.
pub fn to_grayscale(frame: &RgbImage) -> GrayImage {
    imageops::grayscale(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_extract_length_matches_face_size() {
        let frame = solid_frame(64, 48, [10, 20, 30]);
        let size = FaceSize::new(8, 6);
        let vector = extract(&frame, &FaceRect::new(4, 4, 20, 20), size).unwrap();
        assert_eq!(vector.len(), size.feature_len());
    }

    #[test]
    fn test_extract_preserves_solid_color() {
        let frame = solid_frame(32, 32, [10, 20, 30]);
        let vector = extract(&frame, &FaceRect::new(0, 0, 16, 16), FaceSize::new(4, 4)).unwrap();
        for pixel in vector.chunks_exact(3) {
            assert_eq!(pixel, &[10, 20, 30]);
        }
    }

    #[test]
    fn test_extract_clamps_out_of_frame_rect() {
        let frame = solid_frame(32, 32, [200, 100, 50]);
        let size = FaceSize::new(5, 5);
        let vector = extract(&frame, &FaceRect::new(-10, 25, 20, 20), size).unwrap();
        assert_eq!(vector.len(), size.feature_len());
    }

    #[test]
    fn test_extract_rect_outside_frame() {
        let frame = solid_frame(32, 32, [0, 0, 0]);
        assert!(extract(&frame, &FaceRect::new(40, 40, 10, 10), FaceSize::new(5, 5)).is_none());
    }

    #[test]
    fn test_extract_is_deterministic() {
        let frame = RgbImage::from_fn(40, 40, |x, y| Rgb([(x * 6) as u8, (y * 6) as u8, 7]));
        let rect = FaceRect::new(5, 5, 25, 25);
        let size = FaceSize::new(10, 10);
        assert_eq!(extract(&frame, &rect, size), extract(&frame, &rect, size));
    }

    #[test]
    fn test_grayscale_dimensions() {
        let frame = solid_frame(17, 9, [255, 255, 255]);
        let gray = to_grayscale(&frame);
        assert_eq!(gray.dimensions(), (17, 9));
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
    }
}
