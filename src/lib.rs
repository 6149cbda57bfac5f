pub mod archive;
pub mod batch;
pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod server;
pub mod service;

pub use batch::{BatchOrchestrator, BatchResult, ImageInput, ItemOutcome};
pub use config::{Settings, ThresholdMap};
pub use detection::{DetectParams, Detector, DetectorPool};
pub use error::{ArchiveError, CheckError, ConfigError};
pub use models::{BoundingBox, Detection, ToolClass};
pub use pipeline::{DebugConfig, Pipeline, PipelineContext, PipelineStep, build_standard_pipeline};
pub use reconcile::{ExpectedInventory, Reconciliation, reconcile};
pub use service::CheckService;
