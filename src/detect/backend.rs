use anyhow::Result;
use image::RgbImage;
use std::sync::{Arc, Mutex, PoisonError};

use crate::detect::result::Detection;
use crate::error::{TrackerError, TrackerResult};

/// Detector shared by every session of the process (the model is loaded once).
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Object detector backend.
///
/// Implementations receive the normalized working frame and return boxes in
/// its pixel coordinates. The confidence threshold is a hint; callers filter
/// again with a strict `>` comparison.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wrap a backend for sharing across sessions.
pub fn shared<B: DetectorBackend + 'static>(backend: B) -> SharedDetector {
    Arc::new(Mutex::new(backend))
}

/// Run the shared detector on one frame, folding adapter errors into `TrackerError::Inference`.
pub fn detect_shared(
    detector: &SharedDetector,
    image: &RgbImage,
    confidence_threshold: f32,
) -> TrackerResult<Vec<Detection>> {
    let mut backend = detector.lock().unwrap_or_else(PoisonError::into_inner);
    let name = backend.name();
    backend
        .detect(image, confidence_threshold)
        .map_err(|e| TrackerError::Inference(format!("{} backend: {:#}", name, e)))
}
