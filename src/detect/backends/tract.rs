#![cfg(feature = "backend-tract")]

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::config::ModelSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::ImageFrame;
use crate::track::iou;

const BOX_FIELDS: usize = 4;
const PAD_VALUE: f32 = 144.0 / 255.0;

/// Tract-based backend for YOLO ONNX exports.
///
/// Expects a single output shaped `[1, 4 + classes, anchors]` with rows
/// `cx, cy, w, h` followed by per-class scores. Runs on CPU only.
pub struct TractBackend {
    name: String,
    model_path: PathBuf,
    model: Option<TypedRunnableModel<TypedModel>>,
    input_size: u32,
    confidence_threshold: f32,
    nms_iou: f32,
}

impl TractBackend {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            name: settings.yolo_version.clone(),
            model_path: settings.model_source()?,
            model: None,
            input_size: settings.input_size,
            confidence_threshold: settings.conf_threshold,
            nms_iou: settings.nms_iou,
        })
    }

    fn build_input(&self, frame: &ImageFrame) -> Result<(Tensor, f32)> {
        let (height, width, channels) = frame.dims()?;
        if channels != 3 {
            return Err(anyhow!("expected 3 channel RGB frame, received {channels} channels"));
        }
        let rgb = RgbImage::from_raw(width as u32, height as u32, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

        let size = self.input_size as f32;
        let ratio = (size / width as f32).min(size / height as f32);
        let new_w = ((width as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let new_h = ((height as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let resized = image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            if x < new_w as usize && y < new_h as usize {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            } else {
                PAD_VALUE
            }
        });
        Ok((input.into_tensor(), ratio))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [batch, fields, anchors]")?;
        let (_, fields, anchors) = preds.dim();
        if fields <= BOX_FIELDS {
            return Err(anyhow!("model output has no class scores ({fields} fields)"));
        }

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (BOX_FIELDS..fields)
                .map(|row| (row - BOX_FIELDS, preds[[0, row, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, anchor]] / ratio;
            let cy = preds[[0, 1, anchor]] / ratio;
            let w = preds[[0, 2, anchor]] / ratio;
            let h = preds[[0, 3, anchor]] / ratio;
            candidates.push(RawDetection::new(
                [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                class_id as u32,
                score.clamp(0.0, 1.0),
            ));
        }
        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Greedy class-agnostic NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn load(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| format!("failed to load ONNX model from {}", self.model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(model);
        log::info!("loaded detector model {}", self.model_path.display());
        Ok(())
    }

    fn warm_up(&mut self) -> Result<()> {
        if !self.is_loaded() {
            return Ok(());
        }
        let side = self.input_size as usize;
        self.predict(&ImageFrame::zeros(side, side, 3)).map(|_| ())
    }

    fn predict(&mut self, frame: &ImageFrame) -> Result<Vec<RawDetection>> {
        let (input, ratio) = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("Model is not loaded"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, ratio)
    }
}
