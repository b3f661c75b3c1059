#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::geometry::PixelBox;

/// Box coordinates plus objectness precede the class scores in each output row.
const ROW_PREFIX: usize = 5;

/// Tract-based YOLO detector.
///
/// Loads a local ONNX model whose output rows are
/// `[cx, cy, w, h, objectness, class scores...]` with coordinates normalized
/// to the input. The frame is stretched to a square input (no letterbox) so
/// normalized coordinates map straight back onto the frame.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(image, side, side, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let shape = view.shape();
            let row_len = *shape
                .last()
                .ok_or_else(|| anyhow!("model output has no dimensions"))?;
            if row_len <= ROW_PREFIX {
                return Err(anyhow!(
                    "model output rows have {} values, expected more than {}",
                    row_len,
                    ROW_PREFIX
                ));
            }
            let values = view
                .as_slice()
                .ok_or_else(|| anyhow!("model output is not contiguous"))?;
            for row in values.chunks_exact(row_len) {
                let Some((class_id, score)) = best_class(&row[ROW_PREFIX..]) else {
                    continue;
                };
                if score <= confidence_threshold {
                    continue;
                }
                let bbox = PixelBox::from_center(
                    row[0] * width as f32,
                    row[1] * height as f32,
                    row[2] * width as f32,
                    row[3] * height as f32,
                );
                detections.push(Detection::new(bbox, class_id as u32, score));
            }
        }
        Ok(detections)
    }
}

fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| score.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, image.width(), image.height(), confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, 1.0).map(|_| ())
    }
}
