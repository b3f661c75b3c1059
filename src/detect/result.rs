use crate::geometry::PixelBox;

/// COCO class ids the tracker cares about.
pub mod coco {
    pub const PERSON: u32 = 0;
    pub const CHAIR: u32 = 56;
    pub const DINING_TABLE: u32 = 60;
    pub const LAPTOP: u32 = 63;
    pub const MOUSE: u32 = 64;
    pub const KEYBOARD: u32 = 65;

    /// Objects that indicate where a desk is.
    pub const FURNITURE: &[u32] = &[CHAIR, DINING_TABLE, LAPTOP, MOUSE, KEYBOARD];

    pub fn is_furniture(class_id: u32) -> bool {
        FURNITURE.contains(&class_id)
    }
}

/// One scored box produced by a detector for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: PixelBox,
    pub class_id: u32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: PixelBox, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    pub fn person(bbox: PixelBox, confidence: f32) -> Self {
        Self::new(bbox, coco::PERSON, confidence)
    }

    pub fn is_person(&self) -> bool {
        self.class_id == coco::PERSON
    }
}
