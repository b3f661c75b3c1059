use crate::detect::result::Detection;

/// IoU above which two boxes are taken to be the same object.
pub const DUPLICATE_IOU_THRESHOLD: f64 = 0.4;

/// Greedy non-maximum suppression.
///
/// Boxes are visited by descending confidence; a box is kept unless it
/// overlaps an already kept box by more than `iou_threshold`.
pub fn suppress_duplicates(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let duplicate = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelBox;

    #[test]
    fn collapses_overlapping_boxes_to_the_most_confident() {
        let kept = suppress_duplicates(
            vec![
                Detection::person(PixelBox::new(0, 0, 100, 200), 0.6),
                Detection::person(PixelBox::new(5, 5, 100, 200), 0.9),
                Detection::person(PixelBox::new(300, 0, 100, 200), 0.7),
            ],
            DUPLICATE_IOU_THRESHOLD,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].bbox, PixelBox::new(300, 0, 100, 200));
    }

    #[test]
    fn keeps_boxes_at_or_below_threshold() {
        // IoU = 50 / 150 < 0.4
        let kept = suppress_duplicates(
            vec![
                Detection::person(PixelBox::new(0, 0, 10, 10), 0.8),
                Detection::person(PixelBox::new(5, 0, 10, 10), 0.7),
            ],
            DUPLICATE_IOU_THRESHOLD,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(suppress_duplicates(Vec::new(), DUPLICATE_IOU_THRESHOLD).is_empty());
    }
}
