//! Integration tests for the post-processing steps.
//!
//! Tests cover:
//! - Per-class confidence filtering with a default fallback
//! - Per-class deduplication and its tie-breaking
//! - The standard filter + dedup pipeline over a scripted detector

mod common;

use std::sync::Arc;

use kitcheck::detection::dedup::{class_set, dedup_per_class};
use kitcheck::detection::filter::filter_by_threshold;
use kitcheck::detection::{DetectParams, DetectorPool};
use kitcheck::{ThresholdMap, build_standard_pipeline};

use common::*;

#[test]
fn test_filter_keeps_detection_at_threshold() -> anyhow::Result<()> {
    let thresholds = ThresholdMap::new(0.5)?;
    let detections = vec![det(1, 0.5), det(2, 0.4999), det(3, 0.9)];

    let kept = filter_by_threshold(&detections, &thresholds);

    let ids: Vec<u32> = kept.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![1, 3], "Boundary confidence should survive");
    Ok(())
}

#[test]
fn test_filter_custom_class_threshold() -> anyhow::Result<()> {
    // Default 0.5, pliers at 0.7
    let thresholds = ThresholdMap::new(0.5)?.with_class(ToolClass::Pliers, 0.7)?;
    let pliers = ToolClass::Pliers.id();
    let detections = vec![det(pliers, 0.65), det(ToolClass::Brace.id(), 0.55)];

    let kept = filter_by_threshold(&detections, &thresholds);

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, ToolClass::Brace.id());
    Ok(())
}

#[test]
fn test_filter_unknown_class_uses_default() -> anyhow::Result<()> {
    let thresholds = ThresholdMap::new(0.3)?.with_class(ToolClass::Brace, 0.9)?;
    let detections = vec![det(42, 0.35), det(43, 0.25)];

    let kept = filter_by_threshold(&detections, &thresholds);

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 42);
    Ok(())
}

#[test]
fn test_filter_preserves_input_order() -> anyhow::Result<()> {
    let thresholds = ThresholdMap::new(0.1)?;
    let detections = vec![det(5, 0.2), det(1, 0.9), det(3, 0.5)];

    let kept = filter_by_threshold(&detections, &thresholds);

    assert_eq!(kept, detections);
    assert!(filter_by_threshold(&[], &thresholds).is_empty());
    Ok(())
}

#[test]
fn test_threshold_map_rejects_out_of_range() {
    assert!(ThresholdMap::new(1.5).is_err());
    assert!(ThresholdMap::new(-0.1).is_err());
    assert!(ThresholdMap::default().with_class(ToolClass::Pliers, 2.0).is_err());
}

#[test]
fn test_dedup_keeps_most_confident() {
    let deduped = dedup_per_class(vec![det(4, 0.90), det(4, 0.95)]);

    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].confidence, 0.95);
}

#[test]
fn test_dedup_tie_keeps_earliest() {
    let first = det(2, 0.8).with_bbox(kitcheck::BoundingBox {
        x: 1,
        y: 1,
        width: 10,
        height: 10,
    });
    let second = det(2, 0.8);

    let deduped = dedup_per_class(vec![first.clone(), second]);

    assert_eq!(deduped, vec![first]);
}

#[test]
fn test_dedup_orders_by_descending_confidence() {
    let deduped = dedup_per_class(vec![
        det(1, 0.6),
        det(3, 0.7),
        det(1, 0.95),
        det(2, 0.8),
        det(3, 0.1),
    ]);

    let ids: Vec<u32> = deduped.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(class_set(&deduped).len(), 3);
}

#[test]
fn test_standard_pipeline_filters_then_dedups() -> anyhow::Result<()> {
    let detector = ScriptedDetector::new().on_width(
        32,
        Script::Detect(vec![
            det(0, 0.3),
            det(1, 0.6),
            det(1, 0.92),
            det(7, 0.55),
        ]),
    );
    let pool = Arc::new(DetectorPool::single(Box::new(detector)));
    let pipeline = build_standard_pipeline(pool, DetectParams::default());
    assert_eq!(pipeline.step_names(), vec!["Class Threshold Filter", "Per Class Dedup"]);

    let context = pipeline.context("kit.png", Arc::new(ThresholdMap::default()));
    let inspection = pipeline.inspect_bytes(&png_bytes(32, 24), &context)?;

    assert_eq!(inspection.raw_class_ids(), vec![1, 7]);
    assert_eq!(inspection.detections[0].confidence, 0.92);
    assert!(inspection.detector_available);
    Ok(())
}

#[test]
fn test_pipeline_writes_debug_output() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let detector = ScriptedDetector::new().on_width(16, Script::Detect(vec![det(3, 0.8)]));
    let pool = Arc::new(DetectorPool::single(Box::new(detector)));
    let pipeline = build_standard_pipeline(pool, DetectParams::default()).with_debug(debug_dir.clone())?;

    let context = pipeline.context("kit.png", Arc::new(ThresholdMap::default()));
    pipeline.inspect_bytes(&png_bytes(16, 16), &context)?;

    let image_dir = debug_dir.join("0000_kit.png");
    assert!(image_dir.join("00_detector.json").is_file());
    assert!(image_dir.join("01_class_threshold_filter.json").is_file());
    assert!(image_dir.join("02_per_class_dedup.json").is_file());

    let saved: Vec<kitcheck::Detection> =
        serde_json::from_str(&std::fs::read_to_string(image_dir.join("02_per_class_dedup.json"))?)?;
    assert_eq!(saved, vec![det(3, 0.8)]);
    Ok(())
}

#[test]
fn test_images_with_same_name_get_separate_debug_dirs() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let detector = ScriptedDetector::new()
        .on_width(16, Script::Detect(vec![det(3, 0.8)]))
        .on_width(17, Script::Detect(vec![det(5, 0.7)]));
    let pool = Arc::new(DetectorPool::single(Box::new(detector)));
    let pipeline = build_standard_pipeline(pool, DetectParams::default()).with_debug(debug_dir.clone())?;

    // 1. Two archive entries that share a base name
    for width in [16, 17] {
        let context = pipeline.context("photos/kit.png", Arc::new(ThresholdMap::default()));
        pipeline.inspect_bytes(&png_bytes(width, 16), &context)?;
    }

    // 2. Each keeps its own output
    let read = |name: &str| -> anyhow::Result<Vec<kitcheck::Detection>> {
        let path = debug_dir.join(name).join("02_per_class_dedup.json");
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    };
    assert_eq!(read("0000_kit.png")?, vec![det(3, 0.8)]);
    assert_eq!(read("0001_kit.png")?, vec![det(5, 0.7)]);
    Ok(())
}

#[test]
fn test_debug_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("leftover.json"), "[]")?;

    let pipeline = build_standard_pipeline(Arc::new(DetectorPool::pass_through()), DetectParams::default());
    assert!(pipeline.with_debug(dir.path().to_path_buf()).is_err());
    Ok(())
}
