pub mod annotate;
pub mod dedup;
pub mod filter;
pub mod preprocessing;
pub mod steps;
pub mod yolo;

use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::DetectorSettings;
use crate::models::Detection;

/// Inference parameters passed to every detector call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub image_size: u32,
    pub confidence_floor: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self::from(&DetectorSettings::default())
    }
}

impl From<&DetectorSettings> for DetectParams {
    fn from(settings: &DetectorSettings) -> Self {
        Self {
            image_size: settings.image_size,
            confidence_floor: settings.confidence_floor,
            iou_threshold: settings.iou_threshold,
            max_detections: settings.max_detections,
        }
    }
}

/// Object detector backend.
///
/// Implementations are not required to be reentrant; the pool guarantees a
/// single caller per instance at a time.
pub trait Detector: Send {
    /// Run inference on one decoded image
    fn detect(&mut self, image: &DynamicImage, params: &DetectParams) -> anyhow::Result<Vec<Detection>>;

    /// Render the visualization artifact for this image
    fn visualize(&self, image: &DynamicImage, detections: &[Detection]) -> DynamicImage {
        annotate::draw_detections(image, detections)
    }

    /// False for the degraded pass-through backend
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Stand-in used when no model could be loaded: finds nothing and returns
/// the input unannotated.
pub struct PassThroughDetector;

impl Detector for PassThroughDetector {
    fn detect(&mut self, _image: &DynamicImage, _params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn visualize(&self, image: &DynamicImage, _detections: &[Detection]) -> DynamicImage {
        image.clone()
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "pass-through"
    }
}

/// Fixed set of detector replicas, each used by at most one caller at a time
pub struct DetectorPool {
    replicas: Vec<Mutex<Box<dyn Detector>>>,
    next: AtomicUsize,
    /// Fixed at construction so callers never wait on a replica lock
    available: bool,
}

impl DetectorPool {
    pub fn new(replicas: Vec<Box<dyn Detector>>) -> Self {
        let mut replicas: Vec<_> = replicas.into_iter().map(Mutex::new).collect();
        if replicas.is_empty() {
            replicas.push(Mutex::new(Box::new(PassThroughDetector) as Box<dyn Detector>));
        }
        let available = replicas.iter_mut().all(|replica| replica.get_mut().is_available());
        Self {
            replicas,
            next: AtomicUsize::new(0),
            available,
        }
    }

    pub fn single(detector: Box<dyn Detector>) -> Self {
        Self::new(vec![detector])
    }

    pub fn pass_through() -> Self {
        Self::single(Box::new(PassThroughDetector))
    }

    /// Load `settings.replicas` model instances.
    ///
    /// A missing or unloadable model degrades to the pass-through backend
    /// instead of failing.
    pub fn load(settings: &DetectorSettings) -> Self {
        let mut replicas: Vec<Box<dyn Detector>> = Vec::with_capacity(settings.replicas);
        for replica in 0..settings.replicas.max(1) {
            match yolo::YoloDetector::load(&settings.model_path) {
                Ok(detector) => replicas.push(Box::new(detector)),
                Err(e) => {
                    tracing::warn!(
                        model = %settings.model_path.display(),
                        replica,
                        error = %format!("{e:#}"),
                        "detector unavailable, running in pass-through mode"
                    );
                    return Self::pass_through();
                }
            }
        }
        tracing::info!(
            model = %settings.model_path.display(),
            replicas = replicas.len(),
            "detector loaded"
        );
        Self::new(replicas)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Run `f` with exclusive access to one replica.
    ///
    /// Prefers an idle replica; otherwise blocks on the next one in rotation.
    pub fn with_detector<R>(&self, f: impl FnOnce(&mut dyn Detector) -> R) -> R {
        let count = self.replicas.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            if let Some(mut guard) = self.replicas[(start + offset) % count].try_lock() {
                return f(guard.as_mut());
            }
        }

        let mut guard = self.replicas[start].lock();
        f(guard.as_mut())
    }
}

impl std::fmt::Debug for DetectorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorPool")
            .field("replicas", &self.replicas.len())
            .field("available", &self.available)
            .finish()
    }
}
