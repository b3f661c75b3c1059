//! Frames flowing through the tracking loop.
//!
//! - `Frame`: one captured RGB image plus its capture times.
//! - `normalize_width`: resize to the fixed working width, preserving aspect ratio.
//!
//! Every frame is normalized right after capture; all downstream geometry
//! (monitor area, detections, annotations) lives in the normalized space.

use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::Instant;

/// Working width every captured frame is resized to.
pub const WORKING_WIDTH: u32 = 600;

/// A captured frame. Immutable once read; annotation works on a copy.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Monotonic capture instant (drives the presence state machine).
    pub captured_at: Instant,
    /// Wall-clock capture time (shown on annotated frames).
    pub captured_wall: DateTime<Local>,
}

impl Frame {
    /// Wrap a freshly captured image, normalizing it to the working width.
    pub fn capture(image: RgbImage) -> Self {
        Self {
            image: normalize_width(image),
            captured_at: Instant::now(),
            captured_wall: Local::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Resize to `WORKING_WIDTH` wide, height truncated from `h * 600 / w`.
pub fn normalize_width(image: RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == WORKING_WIDTH || width == 0 {
        return image;
    }
    let target_height = ((height as u64 * WORKING_WIDTH as u64) / width as u64).max(1) as u32;
    imageops::resize(&image, WORKING_WIDTH, target_height, FilterType::Triangle)
}

/// Build an RGB image from a packed RGB24 buffer.
pub(crate) fn image_from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> anyhow::Result<RgbImage> {
    let len = pixels.len();
    RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
        anyhow::anyhow!(
            "RGB buffer of {} bytes does not fit a {}x{} frame",
            len,
            width,
            height
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_working_width() {
        let frame = Frame::capture(RgbImage::new(1280, 720));
        assert_eq!(frame.width(), 600);
        assert_eq!(frame.height(), 337);

        let frame = Frame::capture(RgbImage::new(640, 480));
        assert_eq!((frame.width(), frame.height()), (600, 450));
    }

    #[test]
    fn keeps_frames_already_at_working_width() {
        let frame = Frame::capture(RgbImage::new(600, 400));
        assert_eq!((frame.width(), frame.height()), (600, 400));
    }

    #[test]
    fn rejects_short_rgb_buffers() {
        assert!(image_from_rgb(vec![0u8; 11], 2, 2).is_err());
        assert!(image_from_rgb(vec![0u8; 12], 2, 2).is_ok());
    }
}
