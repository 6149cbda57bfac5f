use crate::detection::{dedup, filter};
use crate::models::Detection;
use crate::pipeline::{PipelineContext, PipelineStep};
use anyhow::Result;

/// Drop detections below their class confidence floor
pub struct ThresholdFilterStep;

impl PipelineStep for ThresholdFilterStep {
    fn process(&self, detections: Vec<Detection>, context: &PipelineContext) -> Result<Vec<Detection>> {
        Ok(filter::filter_by_threshold(&detections, &context.thresholds))
    }

    fn name(&self) -> &str {
        "Class Threshold Filter"
    }
}

/// Keep only the most confident detection of each class
pub struct PerClassDedupStep;

impl PipelineStep for PerClassDedupStep {
    fn process(&self, detections: Vec<Detection>, _context: &PipelineContext) -> Result<Vec<Detection>> {
        Ok(dedup::dedup_per_class(detections))
    }

    fn name(&self) -> &str {
        "Per Class Dedup"
    }
}
