use std::collections::{BTreeSet, HashSet};

use crate::models::Detection;

/// Collapse detections to the most confident instance of each class.
///
/// Equal confidences resolve to the earlier input position. The result is
/// ordered by descending confidence.
pub fn dedup_per_class(detections: Vec<Detection>) -> Vec<Detection> {
    let mut ranked = detections;
    // sort_by is stable, so equal scores keep input order
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut seen = HashSet::new();
    ranked.retain(|d| seen.insert(d.class_id));
    ranked
}

/// Distinct class ids present in a detection list
pub fn class_set(detections: &[Detection]) -> BTreeSet<u32> {
    detections.iter().map(|d| d.class_id).collect()
}
