use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::archive::{DEFAULT_MAX_ENTRY_BYTES, DEFAULT_MAX_EXTRACTED_BYTES, ExtractLimits};
use crate::error::ConfigError;
use crate::models::ToolClass;

/// Confidence floor for classes without an explicit threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub media_dir: PathBuf,
    pub detector: DetectorSettings,
    pub thresholds: ThresholdSettings,
    pub batch: BatchSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Path to the `.rten` model; a missing file puts the detector in pass-through mode
    pub model_path: PathBuf,
    pub image_size: u32,
    /// Raw score floor applied inside the detector, before per-class thresholds
    pub confidence_floor: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Number of independently loaded model instances
    pub replicas: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub default: f32,
    pub classes: HashMap<ToolClass, f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub workers: usize,
    pub item_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Largest single image an uploaded archive may expand to
    pub max_archive_entry_bytes: u64,
    /// Total expanded size allowed for one uploaded archive
    pub max_extracted_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("kitcheck.db"),
            media_dir: PathBuf::from("media"),
            detector: DetectorSettings::default(),
            thresholds: ThresholdSettings::default(),
            batch: BatchSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/tools.rten"),
            image_size: 640,
            confidence_floor: 0.01,
            iou_threshold: 0.7,
            max_detections: 300,
            replicas: 1,
        }
    }
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            default: DEFAULT_THRESHOLD,
            classes: HashMap::new(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            item_timeout_secs: None,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 256 * 1024 * 1024,
            max_archive_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, the user config file, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_file_path() {
                Some(default_path) if default_path.is_file() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ThresholdMap::try_from(&self.thresholds)?;

        let detector = &self.detector;
        if !(0.0..=1.0).contains(&detector.confidence_floor) {
            return Err(ConfigError::OutOfRange {
                field: "detector.confidence_floor",
                range: "[0, 1]",
                value: detector.confidence_floor as f64,
            });
        }
        if !(0.0..=1.0).contains(&detector.iou_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "detector.iou_threshold",
                range: "[0, 1]",
                value: detector.iou_threshold as f64,
            });
        }
        if detector.image_size == 0 || detector.image_size % 32 != 0 {
            return Err(ConfigError::OutOfRange {
                field: "detector.image_size",
                range: "positive multiples of 32",
                value: detector.image_size as f64,
            });
        }
        if detector.replicas == 0 {
            return Err(ConfigError::OutOfRange {
                field: "detector.replicas",
                range: ">= 1",
                value: 0.0,
            });
        }
        if self.server.max_archive_entry_bytes == 0 {
            return Err(ConfigError::OutOfRange {
                field: "server.max_archive_entry_bytes",
                range: ">= 1",
                value: 0.0,
            });
        }
        if self.server.max_extracted_bytes == 0 {
            return Err(ConfigError::OutOfRange {
                field: "server.max_extracted_bytes",
                range: ">= 1",
                value: 0.0,
            });
        }
        if self.batch.workers == 0 {
            return Err(ConfigError::OutOfRange {
                field: "batch.workers",
                range: ">= 1",
                value: 0.0,
            });
        }
        Ok(())
    }

    pub fn threshold_map(&self) -> Result<ThresholdMap, ConfigError> {
        ThresholdMap::try_from(&self.thresholds)
    }

    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_entry_bytes: self.server.max_archive_entry_bytes,
            max_total_bytes: self.server.max_extracted_bytes,
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("kitcheck");
            path.push("config.toml");
            path
        })
    }
}

/// Validated per-class confidence floors with an explicit default
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMap {
    default: f32,
    classes: HashMap<ToolClass, f32>,
}

impl ThresholdMap {
    pub fn new(default: f32) -> Result<Self, ConfigError> {
        check_threshold("default", default)?;
        Ok(Self {
            default,
            classes: HashMap::new(),
        })
    }

    /// Same floor for every class, used for request-level confidence overrides
    pub fn uniform(confidence: f32) -> Result<Self, ConfigError> {
        Self::new(confidence)
    }

    pub fn with_class(mut self, class: ToolClass, threshold: f32) -> Result<Self, ConfigError> {
        check_threshold(class.key(), threshold)?;
        self.classes.insert(class, threshold);
        Ok(self)
    }

    pub fn default_threshold(&self) -> f32 {
        self.default
    }

    /// Floor for a raw class id; ids outside the catalog use the default
    pub fn threshold(&self, class_id: u32) -> f32 {
        ToolClass::from_id(class_id)
            .and_then(|class| self.classes.get(&class).copied())
            .unwrap_or(self.default)
    }
}

impl Default for ThresholdMap {
    fn default() -> Self {
        Self {
            default: DEFAULT_THRESHOLD,
            classes: HashMap::new(),
        }
    }
}

impl TryFrom<&ThresholdSettings> for ThresholdMap {
    type Error = ConfigError;

    fn try_from(settings: &ThresholdSettings) -> Result<Self, Self::Error> {
        let mut map = ThresholdMap::new(settings.default)?;
        for (class, threshold) in &settings.classes {
            map = map.with_class(*class, *threshold)?;
        }
        Ok(map)
    }
}

fn check_threshold(key: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange {
            key: key.to_string(),
            value,
        })
    }
}
