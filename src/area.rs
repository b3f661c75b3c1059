//! Monitor-area selection.
//!
//! The desk area is fixed once per session, either parsed from manual
//! coordinates or inferred from furniture detections over a short sample of
//! frames. Both paths fall back to a default rectangle instead of failing.

use crate::detect::{coco, detect_shared, Detection, SharedDetector};
use crate::error::{TrackerError, TrackerResult};
use crate::frame::Frame;
use crate::geometry::{MonitorArea, PixelBox};
use crate::ingest::{next_frame, FrameSource};

/// Manual coordinates used when the caller gives none.
pub const DEFAULT_MANUAL_COORDS: &str = "0.1,0.1,0.9,0.9";

/// Frames sampled by the auto estimator.
pub const AUTO_SAMPLE_FRAMES: usize = 5;

/// Furniture boxes needed before the aggregated box is trusted.
const MIN_DESK_CANDIDATES: usize = 2;

/// Padding added on each side of the aggregated box, as a share of the frame.
const DESK_PADDING: f64 = 0.1;

/// How the session picks its monitor area.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AreaMethod {
    Auto,
    /// `"x1,y1,x2,y2"`, fractional or absolute.
    Manual(String),
}

/// Result of the auto estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct AreaEstimate {
    pub area: MonitorArea,
    /// True when too few furniture boxes were seen and the default was used.
    pub fallback: bool,
    pub candidates: usize,
}

/// Parse `"x1,y1,x2,y2"` into a clamped area.
///
/// When all four values lie in `[0, 1]` they are fractions of the frame;
/// otherwise they are pixels. Values are truncated toward zero.
pub fn parse_manual_coords(coords: &str, width: u32, height: u32) -> TrackerResult<MonitorArea> {
    let values = coords
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TrackerError::configuration(format!("manual coords '{}': {}", coords, e)))?;
    let [x1, y1, x2, y2] = values[..] else {
        return Err(TrackerError::configuration(format!(
            "manual coords '{}' must have four values, got {}",
            coords,
            values.len()
        )));
    };
    if values.iter().any(|v| !v.is_finite()) {
        return Err(TrackerError::configuration(format!(
            "manual coords '{}' must be finite",
            coords
        )));
    }

    let fractional = values.iter().all(|v| (0.0..=1.0).contains(v));
    let (sx, sy) = if fractional {
        (width as f64, height as f64)
    } else {
        (1.0, 1.0)
    };
    let area = MonitorArea {
        x1: (x1 * sx) as i32,
        y1: (y1 * sy) as i32,
        x2: (x2 * sx) as i32,
        y2: (y2 * sy) as i32,
    };
    area.clamped(width, height)
}

/// Centered default with a 10 % margin on every side.
pub fn default_manual_area(width: u32, height: u32) -> MonitorArea {
    fractional_area(width, height, [0.1, 0.1, 0.9, 0.9])
}

/// Middle-bottom default used when too little furniture is detected.
pub fn default_auto_area(width: u32, height: u32) -> MonitorArea {
    fractional_area(width, height, [0.2, 0.4, 0.8, 0.9])
}

fn fractional_area(width: u32, height: u32, [fx1, fy1, fx2, fy2]: [f64; 4]) -> MonitorArea {
    let w = width as f64;
    let h = height as f64;
    let x1 = (w * fx1) as i32;
    let y1 = (h * fy1) as i32;
    // Degenerate frames still get a one-pixel area.
    MonitorArea {
        x1,
        y1,
        x2: ((w * fx2) as i32).max(x1 + 1),
        y2: ((h * fy2) as i32).max(y1 + 1),
    }
}

/// Bounding box of all candidate boxes padded by 10 % of the frame and clamped.
///
/// Fewer than two candidates yield the default auto area.
pub fn aggregate_desk_area(candidates: &[PixelBox], width: u32, height: u32) -> AreaEstimate {
    let fallback = AreaEstimate {
        area: default_auto_area(width, height),
        fallback: true,
        candidates: candidates.len(),
    };
    if candidates.len() < MIN_DESK_CANDIDATES {
        return fallback;
    }

    let min_x = candidates.iter().map(|b| b.x).min().unwrap_or(0);
    let min_y = candidates.iter().map(|b| b.y).min().unwrap_or(0);
    let max_x = candidates.iter().map(PixelBox::right).max().unwrap_or(0);
    let max_y = candidates.iter().map(PixelBox::bottom).max().unwrap_or(0);

    let pad_x = DESK_PADDING * width as f64;
    let pad_y = DESK_PADDING * height as f64;
    let padded = MonitorArea {
        x1: (min_x as f64 - pad_x) as i32,
        y1: (min_y as f64 - pad_y) as i32,
        x2: (max_x as f64 + pad_x) as i32,
        y2: (max_y as f64 + pad_y) as i32,
    };
    match padded.clamped(width, height) {
        Ok(area) => AreaEstimate {
            area,
            fallback: false,
            candidates: candidates.len(),
        },
        Err(err) => {
            log::warn!("aggregated desk area unusable ({}), using default", err);
            fallback
        }
    }
}

/// Furniture boxes above the threshold.
pub fn desk_candidates(detections: &[Detection], confidence_threshold: f32) -> Vec<PixelBox> {
    detections
        .iter()
        .filter(|d| coco::is_furniture(d.class_id) && d.confidence > confidence_threshold)
        .map(|d| d.bbox)
        .collect()
}

/// Sample up to five frames and aggregate furniture detections into a desk area.
///
/// Rewindable sources are rewound before and after sampling so playback
/// starts from the first frame. `initial` supplies the frame size when the
/// source yields nothing. Detector failures count as zero detections.
pub fn estimate_auto_area(
    source: &mut dyn FrameSource,
    detector: &SharedDetector,
    confidence_threshold: f32,
    initial: &Frame,
) -> TrackerResult<AreaEstimate> {
    rewind_if_possible(source)?;

    let mut candidates = Vec::new();
    let mut dims = (initial.width(), initial.height());
    for _ in 0..AUTO_SAMPLE_FRAMES {
        let Some(frame) = next_frame(source)? else {
            break;
        };
        dims = (frame.width(), frame.height());
        match detect_shared(detector, frame.image(), confidence_threshold) {
            Ok(detections) => {
                candidates.extend(desk_candidates(&detections, confidence_threshold))
            }
            Err(err) => log::warn!("desk area sampling: {}", err),
        }
    }

    rewind_if_possible(source)?;

    let estimate = aggregate_desk_area(&candidates, dims.0, dims.1);
    log::debug!(
        "desk area estimate {} from {} candidates (fallback: {})",
        estimate.area,
        estimate.candidates,
        estimate.fallback
    );
    Ok(estimate)
}

fn rewind_if_possible(source: &mut dyn FrameSource) -> TrackerResult<()> {
    if source.is_rewindable() {
        source
            .rewind()
            .map_err(|e| TrackerError::frame_read(format!("rewind for desk sampling: {:#}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{shared, ScriptStep, ScriptedBackend};
    use crate::ingest::{open_source, SourceKind, SourceSettings, SyntheticSource};
    use image::RgbImage;

    fn furniture(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> Detection {
        Detection::new(PixelBox::new(x, y, w, h), coco::LAPTOP, confidence)
    }

    #[test]
    fn fractional_coords_scale_to_frame() -> TrackerResult<()> {
        let area = parse_manual_coords("0.2,0.2,0.8,0.8", 100, 100)?;
        assert_eq!(area, MonitorArea::new(20, 20, 80, 80)?);
        Ok(())
    }

    #[test]
    fn absolute_coords_are_truncated_and_clamped() -> TrackerResult<()> {
        let area = parse_manual_coords(" 50.9, 10 ,700,300.2", 600, 450)?;
        assert_eq!(area, MonitorArea::new(50, 10, 600, 300)?);
        Ok(())
    }

    #[test]
    fn malformed_coords_are_configuration_errors() {
        for coords in ["", "1,2,3", "a,b,c,d", "0.5,0.5,0.2,0.2", "1,2,3,4,5", "NaN,0,1,1"] {
            assert!(
                matches!(
                    parse_manual_coords(coords, 600, 450),
                    Err(TrackerError::Configuration(_))
                ),
                "{coords} should be rejected"
            );
        }
    }

    #[test]
    fn default_areas_follow_frame_size() {
        assert_eq!(
            default_manual_area(600, 450),
            MonitorArea { x1: 60, y1: 45, x2: 540, y2: 405 }
        );
        assert_eq!(
            default_auto_area(600, 450),
            MonitorArea { x1: 120, y1: 180, x2: 480, y2: 405 }
        );
        let tiny = default_manual_area(600, 1);
        assert!(tiny.y1 < tiny.y2);
    }

    #[test]
    fn too_few_candidates_use_default() {
        for candidates in [vec![], vec![PixelBox::new(10, 10, 50, 50)]] {
            let estimate = aggregate_desk_area(&candidates, 600, 450);
            assert!(estimate.fallback);
            assert_eq!(estimate.area, default_auto_area(600, 450));
        }
    }

    #[test]
    fn aggregated_box_is_padded_and_clamped() {
        let candidates = [PixelBox::new(200, 250, 40, 30), PixelBox::new(300, 260, 100, 60)];
        let estimate = aggregate_desk_area(&candidates, 600, 450);
        assert!(!estimate.fallback);
        assert_eq!(estimate.candidates, 2);
        // min (200, 250), max (400, 320), padding (60, 45).
        assert_eq!(estimate.area, MonitorArea { x1: 140, y1: 205, x2: 460, y2: 365 });

        let near_edges = [PixelBox::new(10, 5, 40, 30), PixelBox::new(520, 400, 70, 40)];
        let estimate = aggregate_desk_area(&near_edges, 600, 450);
        assert_eq!(estimate.area, MonitorArea { x1: 0, y1: 0, x2: 600, y2: 450 });
    }

    #[test]
    fn candidates_need_furniture_class_and_strict_confidence() {
        let detections = vec![
            furniture(0, 0, 10, 10, 0.9),
            furniture(0, 0, 10, 10, 0.5),
            Detection::person(PixelBox::new(0, 0, 10, 10), 0.99),
            Detection::new(PixelBox::new(0, 0, 10, 10), coco::CHAIR, 0.51),
        ];
        assert_eq!(desk_candidates(&detections, 0.5).len(), 2);
    }

    #[test]
    fn auto_estimate_samples_and_rewinds_uploads() -> anyhow::Result<()> {
        let mut source = SyntheticSource::open("stub://clip?frames=8", SourceKind::Upload)?;
        let initial = Frame::capture(RgbImage::new(640, 480));
        let backend = ScriptedBackend::new(vec![
            ScriptStep::Detections(vec![furniture(100, 250, 50, 40, 0.8)]),
            ScriptStep::Failure("model hiccup".to_string()),
            ScriptStep::Detections(vec![furniture(300, 300, 60, 40, 0.8)]),
        ]);
        let detector = shared(backend);

        let estimate = estimate_auto_area(&mut source, &detector, 0.5, &initial)?;
        assert!(!estimate.fallback);
        assert_eq!(estimate.candidates, 4);
        // Normalized 600x450 frame: min (100, 250), max (360, 340), padding (60, 45).
        assert_eq!(estimate.area, MonitorArea { x1: 40, y1: 205, x2: 420, y2: 385 });
        assert_eq!(source.position(), 0);
        Ok(())
    }

    #[test]
    fn auto_estimate_on_quiet_scene_falls_back() -> anyhow::Result<()> {
        let mut source = open_source(&SourceSettings::new(SourceKind::Webcam, "stub://cam"))?;
        let initial = Frame::capture(RgbImage::new(640, 480));
        let detector = shared(crate::detect::NullBackend::default());

        let estimate = estimate_auto_area(source.as_mut(), &detector, 0.5, &initial)?;
        assert!(estimate.fallback);
        assert_eq!(estimate.area, default_auto_area(600, 450));
        Ok(())
    }
}
