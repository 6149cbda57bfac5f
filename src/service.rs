use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::archive::{self, ExtractLimits};
use crate::batch::{self, BatchOrchestrator, ImageInput, ItemOutcome, ItemReport};
use crate::config::ThresholdMap;
use crate::core::db::{
    InspectionRepository, InspectionStatus, InventoryDb, NewInspectionRecord, ToolkitItem,
    ToolkitRepository,
};
use crate::error::CheckError;
use crate::media::MediaStore;
use crate::reconcile::ExpectedInventory;

/// Public description of an inventory tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub id: i64,
    pub name: String,
    pub serial_number: String,
    pub category: String,
}

impl From<&ToolkitItem> for ToolInfo {
    fn from(item: &ToolkitItem) -> Self {
        Self {
            id: item.tool.id,
            name: item.tool.name.clone(),
            serial_number: item.tool.serial_number.clone(),
            category: item.tool.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub found_tools: Vec<ToolInfo>,
    pub manual_review: bool,
    pub processed_image_url: String,
    pub raw_class_ids: Vec<u32>,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchImageResult {
    pub filename: String,
    pub success: bool,
    pub found_tools: Vec<ToolInfo>,
    pub manual_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_class_ids: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCheckResponse {
    pub successful_images: usize,
    pub failed_images: usize,
    pub results: Vec<BatchImageResult>,
}

/// Resolved toolkit for one check call
struct ToolkitScope {
    expected: Arc<ExpectedInventory>,
    items: Vec<ToolkitItem>,
}

impl ToolkitScope {
    /// Tools of the toolkit whose class was found, each tool at most once
    fn found_tools(&self, found: &BTreeSet<u32>) -> Vec<ToolInfo> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|item| found.contains(&item.tool.class_id))
            .filter(|item| seen.insert(item.tool.id))
            .map(ToolInfo::from)
            .collect()
    }
}

/// Ties the inventory store, the check pipeline and the media store together
pub struct CheckService {
    db: InventoryDb,
    orchestrator: BatchOrchestrator,
    media: Arc<MediaStore>,
    thresholds: Arc<ThresholdMap>,
    extract_limits: ExtractLimits,
}

impl CheckService {
    pub fn new(
        db: InventoryDb,
        orchestrator: BatchOrchestrator,
        media: Arc<MediaStore>,
        thresholds: ThresholdMap,
    ) -> Self {
        let orchestrator = orchestrator.with_media(media.clone());
        Self {
            db,
            orchestrator,
            media,
            thresholds: Arc::new(thresholds),
            extract_limits: ExtractLimits::default(),
        }
    }

    pub fn with_extract_limits(mut self, limits: ExtractLimits) -> Self {
        self.extract_limits = limits;
        self
    }

    pub fn db(&self) -> &InventoryDb {
        &self.db
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn detector_available(&self) -> bool {
        self.orchestrator.pipeline().detector().is_available()
    }

    /// Thresholds for one call; an override applies to every class
    fn thresholds_for(&self, confidence: Option<f32>) -> Result<Arc<ThresholdMap>, CheckError> {
        match confidence {
            None => Ok(self.thresholds.clone()),
            Some(c) if c.is_finite() && c > 0.0 && c <= 1.0 => ThresholdMap::uniform(c)
                .map(Arc::new)
                .map_err(|e| CheckError::Validation(e.to_string())),
            Some(c) => Err(CheckError::Validation(format!(
                "confidence must be within (0, 1], got {c}"
            ))),
        }
    }

    async fn resolve_toolkit(&self, toolkit_id: i64) -> Result<ToolkitScope, CheckError> {
        let expected = self
            .db
            .expected_inventory(toolkit_id)
            .await?
            .ok_or(CheckError::UnknownToolkit(toolkit_id))?;
        let items = self.db.get_items(toolkit_id).await?;
        Ok(ToolkitScope {
            expected: Arc::new(expected),
            items,
        })
    }

    async fn record(&self, toolkit_id: i64, report: &ItemReport) -> anyhow::Result<()> {
        self.db
            .record_inspection(&NewInspectionRecord {
                toolkit_id,
                status: InspectionStatus::from_manual_review(report.reconciliation.manual_review),
                found_class_ids: report.reconciliation.found.iter().copied().collect(),
                image_ref: report.processed_image.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn check_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        toolkit_id: i64,
        confidence: Option<f32>,
    ) -> Result<CheckResponse, CheckError> {
        let thresholds = self.thresholds_for(confidence)?;
        let scope = self.resolve_toolkit(toolkit_id).await?;

        let pipeline = self.orchestrator.pipeline().clone();
        let media = self.media.clone();
        let expected = scope.expected.clone();
        let input = ImageInput::new(filename, bytes);
        let name = input.filename.clone();

        let report = tokio::task::spawn_blocking(move || {
            batch::check_image(&pipeline, Some(media.as_ref()), &input, &expected, thresholds)
        })
        .await
        .map_err(|e| CheckError::Image {
            filename: name.clone(),
            reason: if e.is_panic() {
                "image processing panicked".to_string()
            } else {
                e.to_string()
            },
        })?
        .map_err(|e| CheckError::Image {
            filename: name.clone(),
            reason: format!("{e:#}"),
        })?;

        self.record(toolkit_id, &report).await?;

        tracing::info!(
            toolkit_id,
            filename = %name,
            found = report.reconciliation.found.len(),
            expected = scope.expected.len(),
            manual_review = report.reconciliation.manual_review,
            "image checked"
        );

        let processed_image_url = report
            .processed_image
            .as_deref()
            .map(MediaStore::url_for)
            .unwrap_or_default();

        Ok(CheckResponse {
            found_tools: scope.found_tools(&report.reconciliation.found),
            manual_review: report.reconciliation.manual_review,
            processed_image_url,
            raw_class_ids: report.raw_class_ids,
            inference_time_ms: report.inference_time_ms,
        })
    }

    pub async fn check_batch(
        &self,
        inputs: Vec<ImageInput>,
        toolkit_id: i64,
        confidence: Option<f32>,
    ) -> Result<BatchCheckResponse, CheckError> {
        if inputs.is_empty() {
            return Err(CheckError::Validation("no images submitted".to_string()));
        }
        let thresholds = self.thresholds_for(confidence)?;
        let scope = self.resolve_toolkit(toolkit_id).await?;

        let result = self
            .orchestrator
            .run(inputs, scope.expected.clone(), thresholds)
            .await;

        let mut results = Vec::with_capacity(result.items.len());
        for item in result.items {
            let manual_review = item.outcome.manual_review();
            let entry = match item.outcome {
                ItemOutcome::Success(report) => {
                    if let Err(e) = self.record(toolkit_id, &report).await {
                        tracing::warn!(filename = %item.filename, error = %e, "failed to record inspection");
                    }
                    BatchImageResult {
                        filename: item.filename,
                        success: true,
                        found_tools: scope.found_tools(&report.reconciliation.found),
                        manual_review,
                        processed_image_url: report.processed_image.as_deref().map(MediaStore::url_for),
                        raw_class_ids: Some(report.raw_class_ids),
                        inference_time_ms: Some(report.inference_time_ms),
                        error_message: None,
                    }
                }
                ItemOutcome::Failure(reason) => BatchImageResult {
                    filename: item.filename,
                    success: false,
                    found_tools: Vec::new(),
                    manual_review,
                    processed_image_url: None,
                    raw_class_ids: None,
                    inference_time_ms: None,
                    error_message: Some(reason),
                },
            };
            results.push(entry);
        }

        Ok(BatchCheckResponse {
            successful_images: result.successful_count,
            failed_images: result.failed_count,
            results,
        })
    }

    /// Expand an uploaded archive and check its images as one batch
    pub async fn check_archive(
        &self,
        bytes: Vec<u8>,
        toolkit_id: i64,
        confidence: Option<f32>,
    ) -> Result<BatchCheckResponse, CheckError> {
        self.thresholds_for(confidence)?;
        if self.db.get_toolkit(toolkit_id).await?.is_none() {
            return Err(CheckError::UnknownToolkit(toolkit_id));
        }

        let limits = self.extract_limits;
        let inputs = tokio::task::spawn_blocking(move || archive::extract_images_with_limits(&bytes, limits))
            .await
            .map_err(|e| CheckError::Internal(e.into()))??;
        tracing::debug!(images = inputs.len(), "archive expanded");

        self.check_batch(inputs, toolkit_id, confidence).await
    }
}
