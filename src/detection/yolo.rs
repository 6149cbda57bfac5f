use anyhow::{Context, anyhow};
use image::DynamicImage;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use std::path::{Path, PathBuf};

use crate::detection::preprocessing::{self, Letterbox};
use crate::detection::{DetectParams, Detector};
use crate::models::{BoundingBox, Detection, ToolClass};

/// YOLOv8-style detector running on CPU through rten.
///
/// Expects a single output of shape `[1, 4 + classes (+ mask coefficients), anchors]`
/// with boxes as center x, center y, width, height in model input pixels.
pub struct YoloDetector {
    model: Model,
    model_path: PathBuf,
    num_classes: usize,
}

impl YoloDetector {
    pub fn load<P: AsRef<Path>>(model_path: P) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            anyhow::bail!("Detector model not found: {}", model_path.display());
        }

        let model = Model::load_file(&model_path)
            .map_err(|e| anyhow!("Failed to load detector model {}: {}", model_path.display(), e))?;

        Ok(Self {
            model,
            model_path,
            num_classes: ToolClass::COUNT,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn infer(&self, input: NdTensor<f32, 4>) -> anyhow::Result<NdTensor<f32, 3>> {
        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| anyhow!("Detector inference failed: {}", e))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| anyhow!("Unexpected detector output: {:?}", e))?;
        Ok(output)
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, image: &DynamicImage, params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
        let size = params.image_size as usize;
        let (letterboxed, geometry) = preprocessing::letterbox(image, params.image_size);
        let input = NdTensor::from_data([1, 3, size, size], preprocessing::to_chw(&letterboxed));

        let output = self.infer(input).context("YOLO forward pass")?;

        // Exports differ in whether anchors are the last or middle axis
        let (rows, anchors, transposed) = if output.size(1) <= output.size(2) {
            (output.size(1), output.size(2), false)
        } else {
            (output.size(2), output.size(1), true)
        };
        if rows < 4 + self.num_classes {
            anyhow::bail!(
                "Detector output has {} rows, expected at least {}",
                rows,
                4 + self.num_classes
            );
        }
        let at = |row: usize, anchor: usize| -> f32 {
            if transposed {
                output[[0, anchor, row]]
            } else {
                output[[0, row, anchor]]
            }
        };

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (0..self.num_classes)
                .map(|class| (class, at(4 + class, anchor)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            let raw_box = [at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor)];
            if let Some(candidate) = decode_candidate(&geometry, class_id as u32, score, raw_box, params.confidence_floor) {
                candidates.push(candidate);
            }
        }

        let kept = non_max_suppression(candidates, params.iou_threshold, params.max_detections);
        Ok(kept
            .into_iter()
            .map(|c| {
                let [x1, y1, x2, y2] = c.corners;
                Detection::new(c.class_id, c.score.clamp(0.0, 1.0)).with_bbox(BoundingBox::from_corners(
                    x1,
                    y1,
                    x2,
                    y2,
                    geometry.src_width,
                    geometry.src_height,
                ))
            })
            .collect())
    }

    fn name(&self) -> &str {
        "yolo-rten"
    }
}

/// Scored box in source image coordinates, prior to suppression
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub score: f32,
    /// x1, y1, x2, y2
    pub corners: [f32; 4],
}

/// Candidate for one anchor, or `None` when it scores below `floor` or the
/// model emitted a non-finite value
pub fn decode_candidate(
    geometry: &Letterbox,
    class_id: u32,
    score: f32,
    [cx, cy, w, h]: [f32; 4],
    floor: f32,
) -> Option<Candidate> {
    if !score.is_finite() || score < floor {
        return None;
    }
    if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Candidate {
        class_id,
        score,
        corners: to_source_corners(geometry, cx, cy, w, h),
    })
}

fn to_source_corners(geometry: &Letterbox, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let (x1, y1) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);
    [x1, y1, x2, y2]
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Class-aware greedy NMS; output is sorted by descending score
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.corners, &candidate.corners) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
