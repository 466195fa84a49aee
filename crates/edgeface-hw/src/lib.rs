//! edgeface-hw — V4L2 camera capture for the recognition loop.
//!
//! Opens a capture device, negotiates a pixel format and hands out RGB
//! frames through [`edgeface_core::FrameSource`].

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::FrameError;
