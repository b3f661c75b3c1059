use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Backend that never detects anything.
///
/// Lets the daemon run the full pipeline (capture, annotation, publication)
/// on hosts without a model.
#[derive(Default)]
pub struct NullBackend {
    frames_seen: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _image: &RgbImage, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_returns_nothing() -> Result<()> {
        let mut backend = NullBackend::new();
        let image = RgbImage::new(600, 450);

        assert!(backend.detect(&image, 0.5)?.is_empty());
        assert!(backend.detect(&image, 0.0)?.is_empty());
        assert_eq!(backend.frames_seen(), 2);
        Ok(())
    }
}
