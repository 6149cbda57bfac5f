use crate::config::ThresholdMap;
use crate::models::Detection;

/// Keep detections whose confidence reaches their class floor.
///
/// Survivors keep their input order.
pub fn filter_by_threshold(detections: &[Detection], thresholds: &ThresholdMap) -> Vec<Detection> {
    detections
        .iter()
        .filter(|d| passes_threshold(d, thresholds))
        .cloned()
        .collect()
}

pub fn passes_threshold(detection: &Detection, thresholds: &ThresholdMap) -> bool {
    detection.confidence >= thresholds.threshold(detection.class_id)
}
