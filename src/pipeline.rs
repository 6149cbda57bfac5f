use anyhow::{Context, Result};
use image::DynamicImage;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::config::ThresholdMap;
use crate::detection::dedup::class_set;
use crate::detection::steps::{PerClassDedupStep, ThresholdFilterStep};
use crate::detection::{DetectParams, DetectorPool};
use crate::models::Detection;

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    /// Numbers each image's debug directory so equal names never collide
    sequence: Arc<AtomicUsize>,
}

/// Context available to all pipeline steps for one image
#[derive(Clone)]
pub struct PipelineContext {
    pub thresholds: Arc<ThresholdMap>,
    pub debug: Option<DebugConfig>,
    /// Display name of the image being processed
    pub label: String,
    /// Debug directory for this image, when debug mode is on
    pub debug_dir: Option<PathBuf>,
}

/// Post-processing step over one image's detections
pub trait PipelineStep: Send + Sync {
    /// Steps may drop or reorder detections but never invent new ones
    fn process(&self, detections: Vec<Detection>, context: &PipelineContext) -> Result<Vec<Detection>>;

    /// Human-readable name for this step (used in logs and debug output)
    fn name(&self) -> &str;
}

/// Everything the single-image pipeline learned about one image
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Detections surviving every step, most confident first
    pub detections: Vec<Detection>,
    pub visualization: DynamicImage,
    pub inference_time_ms: f64,
    pub detector_available: bool,
}

impl Inspection {
    /// Class ids in the order the detections were kept
    pub fn raw_class_ids(&self) -> Vec<u32> {
        self.detections.iter().map(|d| d.class_id).collect()
    }

    pub fn detected_classes(&self) -> BTreeSet<u32> {
        class_set(&self.detections)
    }
}

/// Detector plus an ordered list of post-processing steps
pub struct Pipeline {
    detector: Arc<DetectorPool>,
    params: DetectParams,
    steps: Vec<Arc<dyn PipelineStep>>,
    debug: Option<DebugConfig>,
}

impl Pipeline {
    /// Create a pipeline with no post-processing steps
    pub fn new(detector: Arc<DetectorPool>) -> Self {
        Self {
            detector,
            params: DetectParams::default(),
            steps: Vec::new(),
            debug: None,
        }
    }

    pub fn with_params(mut self, params: DetectParams) -> Self {
        self.params = params;
        self
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig {
            output_dir,
            sequence: Arc::new(AtomicUsize::new(0)),
        });
        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn detector(&self) -> &DetectorPool {
        &self.detector
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn context(&self, label: &str, thresholds: Arc<ThresholdMap>) -> PipelineContext {
        let debug_dir = self.debug.as_ref().map(|debug| {
            let n = debug.sequence.fetch_add(1, Ordering::Relaxed);
            debug.output_dir.join(format!("{:04}_{}", n, sanitize_label(label)))
        });
        PipelineContext {
            thresholds,
            debug: self.debug.clone(),
            label: label.to_string(),
            debug_dir,
        }
    }

    /// Decode an encoded image and run it through the pipeline
    pub fn inspect_bytes(&self, bytes: &[u8], context: &PipelineContext) -> Result<Inspection> {
        let image = image::load_from_memory(bytes)
            .with_context(|| format!("Failed to decode image {}", context.label))?;
        self.inspect(&image, context)
    }

    /// Detect, then apply every step in order
    pub fn inspect(&self, image: &DynamicImage, context: &PipelineContext) -> Result<Inspection> {
        let started = Instant::now();
        let (raw, visualization, detector_available) = self.detector.with_detector(|detector| {
            let raw = detector.detect(image, &self.params)?;
            let visualization = detector.visualize(image, &raw);
            anyhow::Ok((raw, visualization, detector.is_available()))
        })?;
        let inference_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            image = %context.label,
            raw = raw.len(),
            inference_time_ms,
            "detector finished"
        );
        save_debug_output(context, 0, "detector", &raw)?;

        let mut detections = raw;
        for (step_idx, step) in self.steps.iter().enumerate() {
            let before = detections.len();
            detections = step
                .process(detections, context)
                .with_context(|| format!("Step '{}' failed", step.name()))?;
            tracing::debug!(
                image = %context.label,
                step = step.name(),
                before,
                after = detections.len(),
                "step finished"
            );
            save_debug_output(context, step_idx + 1, step.name(), &detections)?;
        }

        Ok(Inspection {
            detections,
            visualization,
            inference_time_ms,
            detector_available,
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("detector", &self.detector)
            .field("params", &self.params)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Threshold filter followed by per-class dedup
pub fn build_standard_pipeline(detector: Arc<DetectorPool>, params: DetectParams) -> Pipeline {
    Pipeline::new(detector)
        .with_params(params)
        .add_step(Arc::new(ThresholdFilterStep))
        .add_step(Arc::new(PerClassDedupStep))
}

/// Save a step's detections as JSON if debug mode is enabled
fn save_debug_output(
    context: &PipelineContext,
    step_index: usize,
    step_name: &str,
    detections: &[Detection],
) -> Result<()> {
    let Some(image_dir) = &context.debug_dir else {
        return Ok(());
    };
    std::fs::create_dir_all(image_dir)?;

    let filename = format!(
        "{:02}_{}.json",
        step_index,
        step_name.to_lowercase().replace(' ', "_")
    );
    let output_path = image_dir.join(&filename);
    let json = serde_json::to_vec_pretty(detections)?;
    std::fs::write(&output_path, json)
        .with_context(|| format!("Failed to save debug output {}", output_path.display()))?;

    tracing::trace!(path = %output_path.display(), "debug output saved");
    Ok(())
}

fn sanitize_label(label: &str) -> String {
    let name = Path::new(label)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "image".to_string() } else { cleaned }
}
