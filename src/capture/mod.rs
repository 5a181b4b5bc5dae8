#[cfg(feature = "camera")]
mod webcam;

#[cfg(feature = "camera")]
pub use webcam::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture the latest available frame
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
