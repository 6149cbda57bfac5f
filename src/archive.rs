use std::io::{Cursor, Read};
use std::path::Path;

use tar::Archive;
use zip::ZipArchive;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::batch::ImageInput;
use crate::error::ArchiveError;

pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Default cap on one extracted image
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
/// Default cap on all extracted images together
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZIP_MAGIC: [u8; 2] = [b'P', b'K'];

/// Container formats accepted for batch uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarZstd,
}

impl ArchiveFormat {
    /// Sniff the format from leading magic bytes; anything unrecognised is read as tar
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&ZSTD_MAGIC) {
            ArchiveFormat::TarZstd
        } else if bytes.starts_with(&ZIP_MAGIC) {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::Tar
        }
    }
}

/// Bounds on how much an archive may expand to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_total_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }
}

/// Running extraction budget; entry sizes from headers are never trusted
struct Budget {
    limits: ExtractLimits,
    used: u64,
}

impl Budget {
    fn new(limits: ExtractLimits) -> Self {
        Self { limits, used: 0 }
    }

    fn remaining(&self) -> u64 {
        self.limits
            .max_entry_bytes
            .min(self.limits.max_total_bytes.saturating_sub(self.used))
    }

    /// Read one entry whose header claims `declared` bytes
    fn read_entry<R: Read>(&mut self, reader: R, filename: &str, declared: u64) -> Result<Vec<u8>, ArchiveError> {
        let allowed = self.remaining();
        if declared > allowed {
            return Err(ArchiveError::Malformed(format!(
                "{filename} declares {declared} bytes, limit is {allowed}"
            )));
        }

        let mut data = Vec::new();
        reader
            .take(allowed.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::Malformed(format!("failed to read {filename}: {e}")))?;

        let actual = data.len() as u64;
        if actual > allowed {
            return Err(ArchiveError::Malformed(format!(
                "{filename} expands beyond the {allowed} byte limit"
            )));
        }
        if actual != declared {
            return Err(ArchiveError::Malformed(format!(
                "{filename} is truncated: header declares {declared} bytes, found {actual}"
            )));
        }

        self.used += actual;
        Ok(data)
    }
}

pub fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Expand a `.zip`, `.tar` or `.tar.zst` archive into its images, in archive order.
///
/// Entries are reported by base name; non-image entries are skipped. The
/// whole archive is rejected if it cannot be read or holds no images.
pub fn extract_images(bytes: &[u8]) -> Result<Vec<ImageInput>, ArchiveError> {
    extract_images_with_limits(bytes, ExtractLimits::default())
}

/// [`extract_images`] with explicit size limits; an entry that is truncated or
/// would exceed a limit rejects the archive as malformed.
pub fn extract_images_with_limits(bytes: &[u8], limits: ExtractLimits) -> Result<Vec<ImageInput>, ArchiveError> {
    let mut budget = Budget::new(limits);
    let images = match ArchiveFormat::detect(bytes) {
        ArchiveFormat::Zip => read_zip(bytes, &mut budget)?,
        ArchiveFormat::Tar => read_tar(Cursor::new(bytes), &mut budget)?,
        ArchiveFormat::TarZstd => {
            let decoder = ZstdDecoder::new(Cursor::new(bytes))
                .map_err(|e| ArchiveError::Malformed(format!("invalid zstd stream: {e}")))?;
            read_tar(decoder, &mut budget)?
        }
    };

    if images.is_empty() {
        return Err(ArchiveError::NoImages);
    }
    Ok(images)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn read_zip(bytes: &[u8], budget: &mut Budget) -> Result<Vec<ImageInput>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ArchiveError::Malformed(format!("invalid zip: {e}")))?;

    let mut images = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
        if file.is_dir() {
            continue;
        }

        let Some(filename) = base_name(Path::new(file.name())) else {
            continue;
        };
        if !is_supported_image(&filename) {
            continue;
        }

        let declared = file.size();
        let data = budget.read_entry(&mut file, &filename, declared)?;
        images.push(ImageInput::new(filename, data));
    }

    Ok(images)
}

fn read_tar<R: Read>(reader: R, budget: &mut Budget) -> Result<Vec<ImageInput>, ArchiveError> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Malformed(e.to_string()))?;

    let mut images = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Malformed(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let filename = {
            let path = entry
                .path()
                .map_err(|e| ArchiveError::Malformed(format!("invalid entry path: {e}")))?;
            match base_name(&path) {
                Some(name) => name,
                None => continue,
            }
        };
        if !is_supported_image(&filename) {
            continue;
        }

        let declared = entry.size();
        let data = budget.read_entry(&mut entry, &filename, declared)?;
        images.push(ImageInput::new(filename, data));
    }

    Ok(images)
}
