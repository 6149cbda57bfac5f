use thiserror::Error;

/// Errors that reject a whole check call.
///
/// Per-image failures inside a batch never surface here; they are recorded
/// in the item's slot of the batch result instead.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Toolkit {0} not found")]
    UnknownToolkit(i64),

    #[error("Archive rejected: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Image {filename} could not be checked: {reason}")]
    Image { filename: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CheckError::Validation(_) | CheckError::UnknownToolkit(_) | CheckError::Archive(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error("archive contains no supported images")]
    NoImages,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("threshold for {key} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { key: String, value: f32 },

    #[error("{field} must be within {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}
