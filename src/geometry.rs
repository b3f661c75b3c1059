//! Pixel-space geometry for the normalized working frame.
//!
//! All coordinates are integer pixels of the 600-px-wide working frame.
//! Detector boxes may extend past the frame edges; the monitor area never does.

use serde::Serialize;
use std::fmt;

use crate::error::{TrackerError, TrackerResult};

/// Minimum share of a person box that must fall inside the monitor area.
pub const DESK_OVERLAP_THRESHOLD: f64 = 0.3;

/// Axis-aligned detector box `(x, y, width, height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from a center point and size, truncating like the detector output mapping.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        let w = width as i32;
        let h = height as i32;
        let x = (cx as i32 as f32 - w as f32 / 2.0) as i32;
        let y = (cy as i32 as f32 - h as f32 / 2.0) as i32;
        Self::new(x, y, w, h)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &PixelBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());
        let iw = (ix2 - ix1).max(0) as i64;
        let ih = (iy2 - iy1).max(0) as i64;
        let inter = iw * ih;
        if inter == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }
}

/// The rectangle considered "the desk", `(x1, y1, x2, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MonitorArea {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl MonitorArea {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> TrackerResult<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(TrackerError::configuration(format!(
                "monitor area ({x1}, {y1}, {x2}, {y2}) is empty or inverted"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Clamp to `[0, width] x [0, height]`, failing if nothing is left.
    pub fn clamped(self, width: u32, height: u32) -> TrackerResult<Self> {
        let w = width as i32;
        let h = height as i32;
        Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Fraction of `person`'s area inside this area. Zero when they do not overlap.
    pub fn overlap_ratio(&self, person: &PixelBox) -> f64 {
        let ix = self.x1.max(person.x);
        let iy = self.y1.max(person.y);
        let iw = self.x2.min(person.right()) - ix;
        let ih = self.y2.min(person.bottom()) - iy;
        if iw <= 0 || ih <= 0 {
            return 0.0;
        }
        let person_area = person.area();
        if person_area == 0 {
            return 0.0;
        }
        (iw as i64 * ih as i64) as f64 / person_area as f64
    }

    /// Whether `person` counts as sitting at the desk (strictly more than 30 % inside).
    pub fn contains_person(&self, person: &PixelBox) -> bool {
        self.overlap_ratio(person) > DESK_OVERLAP_THRESHOLD
    }
}

impl fmt::Display for MonitorArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}
