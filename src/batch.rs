use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::config::ThresholdMap;
use crate::media::MediaStore;
use crate::pipeline::Pipeline;
use crate::reconcile::{ExpectedInventory, Reconciliation, reconcile};

/// One encoded image and the name it is reported under
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Result of a successful single-image check
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub reconciliation: Reconciliation,
    pub raw_class_ids: Vec<u32>,
    pub inference_time_ms: f64,
    /// File name of the stored visualization, when a media store is attached
    pub processed_image: Option<String>,
    pub detector_available: bool,
}

#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Success(ItemReport),
    Failure(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success(_))
    }

    /// Failed items always need a human
    pub fn manual_review(&self) -> bool {
        match self {
            ItemOutcome::Success(report) => report.reconciliation.manual_review,
            ItemOutcome::Failure(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchItemResult {
    /// Position of the image in the submitted batch
    pub index: usize,
    pub filename: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub items: Vec<BatchItemResult>,
}

/// Lifecycle of one batch slot
#[derive(Debug)]
enum ItemState {
    Pending,
    Running,
    Done(ItemOutcome),
}

/// Run the full single-image pipeline and reconcile against `expected`
pub fn check_image(
    pipeline: &Pipeline,
    media: Option<&MediaStore>,
    input: &ImageInput,
    expected: &ExpectedInventory,
    thresholds: Arc<ThresholdMap>,
) -> anyhow::Result<ItemReport> {
    let context = pipeline.context(&input.filename, thresholds);
    let inspection = pipeline.inspect_bytes(&input.bytes, &context)?;
    let reconciliation = reconcile(&inspection.detected_classes(), expected);

    let processed_image = match media {
        Some(store) => Some(store.store_visualization(&inspection.visualization)?),
        None => None,
    };

    Ok(ItemReport {
        raw_class_ids: inspection.raw_class_ids(),
        reconciliation,
        inference_time_ms: inspection.inference_time_ms,
        processed_image,
        detector_available: inspection.detector_available,
    })
}

/// Fans the single-image pipeline out over a batch and collects results in
/// input order
pub struct BatchOrchestrator {
    pipeline: Arc<Pipeline>,
    media: Option<Arc<MediaStore>>,
    workers: usize,
    item_timeout: Option<Duration>,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            media: None,
            workers: 1,
            item_timeout: None,
        }
    }

    pub fn with_media(mut self, media: Arc<MediaStore>) -> Self {
        self.media = Some(media);
        self
    }

    /// Maximum number of items in flight
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn media(&self) -> Option<&Arc<MediaStore>> {
        self.media.as_ref()
    }

    /// Check every image; a failing image only ever affects its own slot
    pub async fn run(
        &self,
        inputs: Vec<ImageInput>,
        expected: Arc<ExpectedInventory>,
        thresholds: Arc<ThresholdMap>,
    ) -> BatchResult {
        let total = inputs.len();
        let mut filenames = Vec::with_capacity(total);
        let mut slots: Vec<ItemState> = (0..total).map(|_| ItemState::Pending).collect();

        tracing::info!(
            total,
            workers = self.workers,
            toolkit_id = expected.toolkit_id(),
            "batch started"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            filenames.push(input.filename.clone());

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    slots[index] = ItemState::Done(ItemOutcome::Failure(format!("worker pool unavailable: {e}")));
                    continue;
                }
            };
            slots[index] = ItemState::Running;

            let pipeline = self.pipeline.clone();
            let media = self.media.clone();
            let expected = expected.clone();
            let thresholds = thresholds.clone();
            let item_timeout = self.item_timeout;

            let abandoned = Arc::new(AtomicBool::new(false));
            let abandoned_flag = abandoned.clone();

            tasks.spawn(async move {
                // The permit lives as long as the blocking work, not the await
                // on it, so a timed-out item still occupies its worker.
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let result = check_image(&pipeline, media.as_deref(), &input, &expected, thresholds);
                    if abandoned_flag.load(Ordering::Acquire) {
                        discard_artifact(media.as_deref(), &result);
                    }
                    result
                });

                let outcome = match item_timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(joined) => outcome_from_join(joined),
                        Err(_) => {
                            abandoned.store(true, Ordering::Release);
                            ItemOutcome::Failure(format!("timed out after {:.1}s", limit.as_secs_f64()))
                        }
                    },
                    None => outcome_from_join(work.await),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = ItemState::Done(outcome),
                Err(e) => tracing::error!(error = %e, "batch task aborted"),
            }
        }

        let mut successful_count = 0;
        let mut failed_count = 0;
        let items: Vec<BatchItemResult> = slots
            .into_iter()
            .zip(filenames)
            .enumerate()
            .map(|(index, (state, filename))| {
                let outcome = match state {
                    ItemState::Done(outcome) => outcome,
                    ItemState::Pending | ItemState::Running => {
                        ItemOutcome::Failure("processing did not complete".to_string())
                    }
                };
                match &outcome {
                    ItemOutcome::Success(_) => successful_count += 1,
                    ItemOutcome::Failure(reason) => {
                        failed_count += 1;
                        tracing::warn!(index, filename = %filename, reason = %reason, "batch item failed");
                    }
                }
                BatchItemResult {
                    index,
                    filename,
                    outcome,
                }
            })
            .collect();

        tracing::info!(total, successful_count, failed_count, "batch finished");

        BatchResult {
            total,
            successful_count,
            failed_count,
            items,
        }
    }
}

/// Remove the visualization of an item whose result nobody will read
fn discard_artifact(media: Option<&MediaStore>, result: &anyhow::Result<ItemReport>) {
    let (Some(store), Ok(ItemReport { processed_image: Some(name), .. })) = (media, result) else {
        return;
    };
    if let Err(e) = store.remove(name) {
        tracing::warn!(file = %name, error = %format!("{e:#}"), "failed to discard timed-out visualization");
    }
}

fn outcome_from_join(joined: Result<anyhow::Result<ItemReport>, JoinError>) -> ItemOutcome {
    match joined {
        Ok(Ok(report)) => ItemOutcome::Success(report),
        Ok(Err(e)) => ItemOutcome::Failure(format!("{e:#}")),
        Err(e) if e.is_panic() => ItemOutcome::Failure("image processing panicked".to_string()),
        Err(e) => ItemOutcome::Failure(format!("image processing was cancelled: {e}")),
    }
}
