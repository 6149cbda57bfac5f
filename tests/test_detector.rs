//! Integration tests for the detector backend helpers.
//!
//! Tests cover:
//! - Non-maximum suppression and IoU
//! - Letterbox geometry
//! - Annotation drawing
//! - Pool fallback when the model is missing
//! - Non-finite model output

mod common;

use image::{DynamicImage, Rgb, RgbImage};
use kitcheck::config::DetectorSettings;
use kitcheck::detection::annotate::{class_color, draw_detections};
use kitcheck::detection::preprocessing::{Letterbox, PAD_VALUE, letterbox, to_chw};
use kitcheck::detection::yolo::{Candidate, decode_candidate, iou, non_max_suppression};
use kitcheck::detection::{DetectParams, Detector, PassThroughDetector};
use kitcheck::BoundingBox;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;

fn candidate(class_id: u32, score: f32, corners: [f32; 4]) -> Candidate {
    Candidate { class_id, score, corners }
}

#[test]
fn test_iou() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);

    // Half overlap: 50 / 150
    let b = [5.0, 0.0, 15.0, 10.0];
    assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
}

#[test]
fn test_nms_suppresses_same_class_overlap_only() {
    let candidates = vec![
        candidate(1, 0.6, [0.0, 0.0, 10.0, 10.0]),
        candidate(1, 0.9, [0.5, 0.5, 10.5, 10.5]),
        candidate(2, 0.8, [0.0, 0.0, 10.0, 10.0]),
        candidate(1, 0.7, [50.0, 50.0, 60.0, 60.0]),
    ];

    let kept = non_max_suppression(candidates, 0.7, 300);

    let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.7]);
}

#[test]
fn test_nms_truncates_to_max_detections() {
    let candidates: Vec<Candidate> = (0..10)
        .map(|i| candidate(i, 0.1 * i as f32, [0.0, 0.0, 5.0, 5.0]))
        .collect();

    let kept = non_max_suppression(candidates, 0.7, 3);

    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].class_id, 9);
}

#[test]
fn test_letterbox_pads_short_side() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));

    let (canvas, geometry) = letterbox(&img, 64);

    assert_eq!(canvas.dimensions(), (64, 64));
    assert_eq!(geometry.scale, 0.32);
    assert_eq!(geometry.pad_x, 0.0);
    assert_eq!(geometry.pad_y, 16.0);
    assert_eq!(canvas.get_pixel(32, 0), &Rgb([PAD_VALUE; 3]));
    let inside = canvas.get_pixel(32, 32);
    assert!(inside[0] > 250 && inside[1] < 5 && inside[2] < 5, "got {inside:?}");

    let (x, y) = geometry.to_source(32.0, 32.0);
    assert!((x - 100.0).abs() < 1e-3);
    assert!((y - 50.0).abs() < 1e-3);
}

#[test]
fn test_to_chw_is_planar_and_normalized() {
    let mut img = RgbImage::new(2, 1);
    img.put_pixel(0, 0, Rgb([255, 0, 0]));
    img.put_pixel(1, 0, Rgb([0, 0, 255]));

    let data = to_chw(&img);

    assert_eq!(data, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_draw_detections_outlines_boxes() {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb([0, 0, 0])));
    let detections = vec![
        det(2, 0.9).with_bbox(BoundingBox {
            x: 5,
            y: 5,
            width: 20,
            height: 20,
        }),
        det(3, 0.9),
    ];

    let annotated = draw_detections(&img, &detections).to_rgb8();

    assert_eq!(annotated.get_pixel(5, 5), &class_color(2));
    assert_eq!(annotated.get_pixel(15, 15), &Rgb([0, 0, 0]), "interior is untouched");
    assert_eq!(annotated.dimensions(), (40, 40));
}

#[test]
fn test_bounding_box_clamps_to_image() {
    let bbox = BoundingBox::from_corners(-5.0, 10.0, 120.0, 30.0, 100, 50);

    assert_eq!(bbox.x, 0);
    assert_eq!(bbox.y, 10);
    assert_eq!(bbox.width, 99);
    assert_eq!(bbox.height, 20);
}

#[test]
fn test_bounding_box_tolerates_nan_corners() {
    let bbox = BoundingBox::from_corners(f32::NAN, 10.0, 50.0, f32::NAN, 100, 50);

    assert_eq!(bbox.x, 0);
    assert_eq!(bbox.width, 50);
    assert_eq!(bbox.height, 1);
}

#[test]
fn test_non_finite_candidates_are_dropped() {
    let geometry = Letterbox::for_size(640, 640, 640);

    let kept = decode_candidate(&geometry, 2, 0.9, [100.0, 100.0, 20.0, 20.0], 0.01);
    assert_eq!(kept.map(|c| c.class_id), Some(2));

    assert!(decode_candidate(&geometry, 2, 0.9, [f32::NAN, 100.0, 20.0, 20.0], 0.01).is_none());
    assert!(decode_candidate(&geometry, 2, 0.9, [100.0, 100.0, f32::INFINITY, 20.0], 0.01).is_none());
    assert!(decode_candidate(&geometry, 2, f32::NAN, [100.0, 100.0, 20.0, 20.0], 0.01).is_none());
    assert!(decode_candidate(&geometry, 2, 0.005, [100.0, 100.0, 20.0, 20.0], 0.01).is_none());
}

#[test]
fn test_pass_through_returns_input() -> anyhow::Result<()> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([1, 2, 3])));
    let mut detector = PassThroughDetector;

    let detections = detector.detect(&img, &DetectParams::default())?;
    let visual = detector.visualize(&img, &[det(1, 0.9)]);

    assert!(detections.is_empty());
    assert!(!detector.is_available());
    assert_eq!(visual.to_rgb8(), img.to_rgb8());
    Ok(())
}

#[test]
fn test_pool_falls_back_when_model_missing() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let settings = DetectorSettings {
        model_path: dir.path().join("missing.rten"),
        replicas: 2,
        ..Default::default()
    };

    let pool = DetectorPool::load(&settings);

    assert!(!pool.is_available());
    assert_eq!(pool.replica_count(), 1);
}

#[test]
fn test_pool_with_no_replicas_is_pass_through() {
    let pool = DetectorPool::new(Vec::new());

    assert_eq!(pool.replica_count(), 1);
    assert!(!pool.is_available());
    assert!(DetectorPool::single(Box::new(ScriptedDetector::new())).is_available());
}

#[test]
fn test_availability_does_not_wait_for_busy_replica() {
    let detector =
        ScriptedDetector::new().on_width(8, Script::Sleep(Duration::from_millis(1500), Vec::new()));
    let pool = Arc::new(DetectorPool::single(Box::new(detector)));

    // 1. Occupy the only replica
    let busy = pool.clone();
    let worker = std::thread::spawn(move || {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        busy.with_detector(|detector| detector.detect(&img, &DetectParams::default()).map(|d| d.len()))
    });
    std::thread::sleep(Duration::from_millis(100));

    // 2. Availability answers right away
    let started = Instant::now();
    assert!(pool.is_available());
    assert!(started.elapsed() < Duration::from_millis(500));

    let finished = worker.join().expect("worker thread");
    assert_eq!(finished.expect("scripted detection"), 0);
}

#[test]
fn test_tool_class_ids_round_trip() -> anyhow::Result<()> {
    assert_eq!(ToolClass::COUNT, 11);
    for (index, class) in ToolClass::ALL.iter().enumerate() {
        assert_eq!(class.id() as usize, index);
        assert_eq!(ToolClass::from_id(class.id()), Some(*class));
        assert_eq!(class.key().parse::<ToolClass>()?, *class);
    }
    assert_eq!(ToolClass::from_id(11), None);
    Ok(())
}
