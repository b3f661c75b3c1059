//! Frame overlays and JPEG encoding for the published frame.
//!
//! Boxes and the status badge are always drawn. Text needs a TTF font; without
//! one the labels are skipped.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use std::time::Duration;

use crate::classifier::Classification;
use crate::geometry::{MonitorArea, PixelBox};
use crate::ingest::SourceKind;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const PLACEHOLDER_GRAY: Rgb<u8> = Rgb([50, 50, 50]);

pub const PLACEHOLDER_SIZE: (u32, u32) = (400, 300);
const JPEG_QUALITY: u8 = 80;

const LABEL_SCALE: f32 = 16.0;
const STATUS_SCALE: f32 = 22.0;

/// What the overlay shows for one frame.
#[derive(Clone, Debug)]
pub struct Overlay<'a> {
    pub area: &'a MonitorArea,
    pub classification: &'a Classification,
    pub present: bool,
    pub absence: Option<Duration>,
    pub timestamp: DateTime<Local>,
    pub source: SourceKind,
}

#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("parse font {}", path.display()))?;
        Ok(Self::new(Some(font)))
    }

    pub fn annotate(&self, image: &mut RgbImage, overlay: &Overlay<'_>) {
        for person in &overlay.classification.persons {
            let (color, role) = if person.at_desk {
                (RED, "Employee")
            } else {
                (BLUE, "Person")
            };
            let bbox = person.detection.bbox;
            draw_box(image, bbox, color);
            let label = format!("{}: {:.2}", role, person.detection.confidence);
            self.text(image, color, bbox.x, bbox.y - 18, LABEL_SCALE, &label);
        }

        let area = overlay.area;
        draw_box(
            image,
            PixelBox::new(area.x1, area.y1, area.width(), area.height()),
            GREEN,
        );

        let status_color = if overlay.present { GREEN } else { RED };
        let badge_x = image.width() as i32 - 24;
        draw_filled_rect_mut(image, Rect::at(badge_x, 10).of_size(14, 14), status_color);

        let status = if overlay.present {
            "Status: PRESENT"
        } else {
            "Status: ABSENT"
        };
        self.text(image, status_color, 10, 12, STATUS_SCALE, status);
        if let Some(absence) = overlay.absence.filter(|_| !overlay.present) {
            let text = format!("Absence: {:.1}s", absence.as_secs_f64());
            self.text(image, RED, 10, 42, STATUS_SCALE, &text);
        }
        let time = format!("Time: {}", overlay.timestamp.format("%Y-%m-%d %H:%M:%S"));
        self.text(image, WHITE, 10, 76, LABEL_SCALE, &time);
        let source = format!("Source: {}", overlay.source);
        self.text(image, WHITE, 10, 96, LABEL_SCALE, &source);
    }

    /// Gray "Loading..." frame served before the first frame is published.
    pub fn placeholder(&self) -> RgbImage {
        let (width, height) = PLACEHOLDER_SIZE;
        let mut image = RgbImage::from_pixel(width, height, PLACEHOLDER_GRAY);
        self.text(&mut image, WHITE, 140, 138, STATUS_SCALE, "Loading...");
        image
    }

    fn text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, scale: f32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y.max(0), PxScale::from(scale), font, text);
        }
    }
}

/// Two-pixel outline; boxes with no area are skipped.
fn draw_box(image: &mut RgbImage, bbox: PixelBox, color: Rgb<u8>) {
    if bbox.width <= 0 || bbox.height <= 0 {
        return;
    }
    draw_hollow_rect_mut(
        image,
        Rect::at(bbox.x, bbox.y).of_size(bbox.width as u32, bbox.height as u32),
        color,
    );
    if bbox.width > 2 && bbox.height > 2 {
        draw_hollow_rect_mut(
            image,
            Rect::at(bbox.x + 1, bbox.y + 1).of_size(bbox.width as u32 - 2, bbox.height as u32 - 2),
            color,
        );
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(image)
        .context("encode frame as JPEG")?;
    Ok(bytes)
}
