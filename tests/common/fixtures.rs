use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use kitcheck::core::db::{InventoryDb, NewTool, NewToolkit, ToolRepository, ToolkitRepository};
use kitcheck::detection::{DetectParams, Detector, DetectorPool};
use kitcheck::media::MediaStore;
use kitcheck::{BatchOrchestrator, CheckService, Detection, ThresholdMap, ToolClass, build_standard_pipeline};

/// What the scripted detector does for images of one width
#[derive(Clone)]
pub enum Script {
    Detect(Vec<Detection>),
    Fail(String),
    Panic,
    Sleep(Duration, Vec<Detection>),
}

/// In-process detector whose output is keyed by image width, so each test
/// image can be routed to its own scripted result.
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    scripts: HashMap<u32, Script>,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

/// Counts detector calls in flight and remembers the highest count seen
#[derive(Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_width(mut self, width: u32, script: Script) -> Self {
        self.scripts.insert(width, script);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    fn run_script(&self, width: u32) -> anyhow::Result<Vec<Detection>> {
        match self.scripts.get(&width) {
            Some(Script::Detect(detections)) => Ok(detections.clone()),
            Some(Script::Fail(reason)) => Err(anyhow::anyhow!("{}", reason)),
            Some(Script::Panic) => panic!("scripted detector panic"),
            Some(Script::Sleep(duration, detections)) => {
                std::thread::sleep(*duration);
                Ok(detections.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, image: &DynamicImage, _params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        let result = self.run_script(image.width());
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Shorthand for a detection without a box
pub fn det(class_id: u32, confidence: f32) -> Detection {
    Detection::new(class_id, confidence)
}

/// PNG bytes of a solid grey image with the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([128u8, 128u8, 128u8]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("Failed to encode test image");
    buffer
}

/// Creates an InventoryDb in a temporary directory.
/// Returns both the database and the temp directory (which must be kept alive).
pub async fn create_test_db() -> (InventoryDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = InventoryDb::open(dir.path().join("inventory.db"))
        .await
        .expect("Failed to create test database");
    (db, dir)
}

/// Creates a toolkit holding one tool per given class and returns its id
pub async fn seed_toolkit(db: &InventoryDb, name: &str, classes: &[ToolClass]) -> anyhow::Result<i64> {
    let toolkit = db
        .add_toolkit(&NewToolkit {
            name: name.to_string(),
            description: None,
        })
        .await?;
    for class in classes {
        let tool = db
            .add_tool(&NewTool {
                name: class.display_name().to_string(),
                serial_number: format!("{}-{}", name, class.key()),
                category: "hand_tools".to_string(),
                class_id: class.id(),
            })
            .await?;
        db.set_item(toolkit.id, tool.id, 1).await?;
    }
    Ok(toolkit.id)
}

pub fn make_tool(serial_number: &str, class: ToolClass) -> NewTool {
    NewTool {
        name: class.display_name().to_string(),
        serial_number: serial_number.to_string(),
        category: "hand_tools".to_string(),
        class_id: class.id(),
    }
}

pub fn scripted_orchestrator(detector: ScriptedDetector, workers: usize) -> BatchOrchestrator {
    let pool = Arc::new(DetectorPool::single(Box::new(detector)));
    let pipeline = build_standard_pipeline(pool, DetectParams::default());
    BatchOrchestrator::new(Arc::new(pipeline)).with_workers(workers)
}

/// CheckService over a scripted detector with media under `dir`
pub fn scripted_service(db: InventoryDb, detector: ScriptedDetector, dir: &tempfile::TempDir) -> CheckService {
    let media = Arc::new(MediaStore::open(dir.path().join("media")).expect("Failed to open media store"));
    CheckService::new(db, scripted_orchestrator(detector, 2), media, ThresholdMap::default())
}
