//! Integration tests for CheckService.
//!
//! Tests cover:
//! - Single-image checks against a stored toolkit
//! - Request validation (unknown toolkit, confidence range, empty batch)
//! - Batch and archive checks with per-image failures
//! - Inspection history written by checks

mod common;

use kitcheck::server::status_for;
use axum::http::StatusCode;

use common::*;

#[tokio::test]
async fn test_single_check_reports_found_tools() -> anyhow::Result<()> {
    // 1. Toolkit expects pliers and a brace
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers, ToolClass::Brace]).await?;

    // 2. Detector sees pliers twice and an unrelated wrench
    let detector = ScriptedDetector::new().on_width(
        64,
        Script::Detect(vec![
            det(ToolClass::Pliers.id(), 0.6),
            det(ToolClass::Pliers.id(), 0.8),
            det(ToolClass::AdjustableWrench.id(), 0.9),
        ]),
    );
    let service = scripted_service(db, detector, &temp_dir);

    // 3. Check the image
    let response = service.check_image(png_bytes(64, 48), "kit.png", toolkit_id, None).await?;

    // 4. Verify the reconciliation
    assert_eq!(response.found_tools.len(), 1);
    assert_eq!(response.found_tools[0].name, ToolClass::Pliers.display_name());
    assert!(response.manual_review, "brace is missing");
    assert_eq!(
        response.raw_class_ids,
        vec![ToolClass::AdjustableWrench.id(), ToolClass::Pliers.id()]
    );
    assert!(response.processed_image_url.starts_with("/media/processed_"));
    assert!(response.processed_image_url.ends_with(".jpg"));

    let filename = response.processed_image_url.trim_start_matches("/media/");
    assert!(service.media().resolve(filename).is_some());
    Ok(())
}

#[tokio::test]
async fn test_confidence_override_applies_to_all_classes() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers]).await?;
    let detector = ScriptedDetector::new()
        .on_width(32, Script::Detect(vec![det(ToolClass::Pliers.id(), 0.3)]));
    let service = scripted_service(db, detector, &temp_dir);

    let strict = service.check_image(png_bytes(32, 32), "a.png", toolkit_id, None).await?;
    assert!(strict.manual_review, "0.3 is below the default threshold");

    let lenient = service
        .check_image(png_bytes(32, 32), "a.png", toolkit_id, Some(0.25))
        .await?;
    assert!(!lenient.manual_review);
    assert_eq!(lenient.found_tools.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_check_rejects_invalid_requests() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers]).await?;
    let service = scripted_service(db, ScriptedDetector::new(), &temp_dir);

    let err = service
        .check_image(png_bytes(8, 8), "a.png", toolkit_id + 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::UnknownToolkit(_)));
    assert_eq!(status_for(&err), StatusCode::NOT_FOUND);

    for confidence in [0.0, -0.5, 1.5, f32::NAN] {
        let err = service
            .check_image(png_bytes(8, 8), "a.png", toolkit_id, Some(confidence))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Validation(_)), "confidence {confidence}");
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    let err = service.check_batch(vec![], toolkit_id, None).await.unwrap_err();
    assert!(matches!(err, CheckError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_single_undecodable_image_is_an_image_error() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers]).await?;
    let service = scripted_service(db, ScriptedDetector::new(), &temp_dir);

    let err = service
        .check_image(b"garbage".to_vec(), "broken.jpg", toolkit_id, None)
        .await
        .unwrap_err();

    match &err {
        CheckError::Image { filename, .. } => assert_eq!(filename, "broken.jpg"),
        other => panic!("expected image error, got {other:?}"),
    }
    assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn test_batch_check_isolates_failures() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers, ToolClass::Brace]).await?;
    let detector = ScriptedDetector::new()
        .on_width(
            20,
            Script::Detect(vec![det(ToolClass::Pliers.id(), 0.9), det(ToolClass::Brace.id(), 0.9)]),
        )
        .on_width(30, Script::Detect(vec![det(ToolClass::Brace.id(), 0.9)]));
    let service = scripted_service(db, detector, &temp_dir);

    let inputs = vec![
        ImageInput::new("full.png", png_bytes(20, 10)),
        ImageInput::new("broken.png", b"\x89PNG nope".to_vec()),
        ImageInput::new("partial.png", png_bytes(30, 10)),
    ];
    let response = service.check_batch(inputs, toolkit_id, None).await?;

    assert_eq!(response.successful_images, 2);
    assert_eq!(response.failed_images, 1);
    assert_eq!(response.results.len(), 3);

    let full = &response.results[0];
    assert_eq!(full.filename, "full.png");
    assert!(full.success && !full.manual_review);
    assert_eq!(full.found_tools.len(), 2);
    assert!(full.processed_image_url.is_some());

    let broken = &response.results[1];
    assert!(!broken.success);
    assert!(broken.manual_review);
    assert!(broken.found_tools.is_empty());
    assert!(broken.error_message.is_some());
    assert!(broken.raw_class_ids.is_none());

    let partial = &response.results[2];
    assert!(partial.success && partial.manual_review);
    assert_eq!(partial.found_tools[0].name, ToolClass::Brace.display_name());

    // Only successful images are recorded
    let history = service.db().get_inspections(toolkit_id).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, InspectionStatus::ManualCheck);
    assert_eq!(history[1].status, InspectionStatus::Ok);
    Ok(())
}

#[tokio::test]
async fn test_batch_result_serializes_optional_fields() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[]).await?;
    let service = scripted_service(db, ScriptedDetector::new(), &temp_dir);

    let inputs = vec![
        ImageInput::new("ok.png", png_bytes(8, 8)),
        ImageInput::new("bad.png", Vec::new()),
    ];
    let response = service.check_batch(inputs, toolkit_id, None).await?;
    let json = serde_json::to_value(&response)?;

    let ok = &json["results"][0];
    assert_eq!(ok["success"], true);
    assert_eq!(ok["manual_review"], false, "empty toolkit is complete");
    assert!(ok.get("error_message").is_none());

    let bad = &json["results"][1];
    assert_eq!(bad["success"], false);
    assert!(bad.get("processed_image_url").is_none());
    assert!(bad["error_message"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_archive_check() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Shernitsa]).await?;
    let detector = ScriptedDetector::new()
        .on_width(16, Script::Detect(vec![det(ToolClass::Shernitsa.id(), 0.75)]));
    let service = scripted_service(db, detector, &temp_dir);

    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in [("a.png", png_bytes(16, 16)), ("notes.txt", b"skip".to_vec()), ("b.png", png_bytes(17, 16))] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice())?;
    }
    let archive = builder.into_inner()?;

    let response = service.check_archive(archive, toolkit_id, None).await?;

    let names: Vec<&str> = response.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.png"]);
    assert!(!response.results[0].manual_review);
    assert!(response.results[1].manual_review);
    Ok(())
}

#[tokio::test]
async fn test_archive_rejected_before_processing() -> anyhow::Result<()> {
    let (db, temp_dir) = create_test_db().await;
    let toolkit_id = seed_toolkit(&db, "kit", &[ToolClass::Pliers]).await?;
    let service = scripted_service(db, ScriptedDetector::new(), &temp_dir);

    let err = service
        .check_archive(vec![0u8; 1024], toolkit_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::Archive(_)), "got {err:?}");
    assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);

    let err = service
        .check_archive(vec![0u8; 1024], toolkit_id + 5, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::UnknownToolkit(_)));

    assert!(service.db().get_inspections(toolkit_id).await?.is_empty());
    Ok(())
}
