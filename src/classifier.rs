//! Per-frame presence classification.

use image::RgbImage;

use crate::detect::{detect_shared, suppress_duplicates, Detection, SharedDetector, DUPLICATE_IOU_THRESHOLD};
use crate::geometry::MonitorArea;

/// A person box that survived filtering, with its desk overlap.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonVerdict {
    pub detection: Detection,
    /// Share of the person box inside the monitor area.
    pub overlap: f64,
    pub at_desk: bool,
}

/// Outcome for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    /// True when any surviving person is at the desk.
    pub employee_detected: bool,
    pub persons: Vec<PersonVerdict>,
    /// Set when the detector failed; the frame then counts as empty.
    pub inference_error: Option<String>,
}

/// Run the detector and decide whether someone is at the desk.
///
/// Inference failures are logged and degrade to "no detections".
pub fn classify(
    image: &RgbImage,
    area: &MonitorArea,
    confidence_threshold: f32,
    detector: &SharedDetector,
) -> Classification {
    match detect_shared(detector, image, confidence_threshold) {
        Ok(detections) => classify_detections(detections, area, confidence_threshold),
        Err(err) => {
            log::warn!("presence classification: {}", err);
            Classification {
                inference_error: Some(err.to_string()),
                ..Classification::default()
            }
        }
    }
}

/// Person filter, duplicate suppression and desk overlap test.
pub fn classify_detections(
    detections: Vec<Detection>,
    area: &MonitorArea,
    confidence_threshold: f32,
) -> Classification {
    let persons: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.is_person() && d.confidence > confidence_threshold)
        .collect();

    let persons: Vec<PersonVerdict> = suppress_duplicates(persons, DUPLICATE_IOU_THRESHOLD)
        .into_iter()
        .map(|detection| {
            let overlap = area.overlap_ratio(&detection.bbox);
            PersonVerdict {
                at_desk: area.contains_person(&detection.bbox),
                overlap,
                detection,
            }
        })
        .collect();

    Classification {
        employee_detected: persons.iter().any(|p| p.at_desk),
        persons,
        inference_error: None,
    }
}
