use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use std::path::{Component, Path, PathBuf};
use tempdir::TempDir;
use uuid::Uuid;

const STAGING_PREFIX: &str = ".staging";

/// Directory of processed images served back to callers
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create media directory {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encode a visualization as JPEG and publish it, returning its file name.
    ///
    /// The image is written into a scoped staging directory first and moved
    /// into place only once fully encoded; the staging directory is removed
    /// on every exit path.
    pub fn store_visualization(&self, image: &DynamicImage) -> anyhow::Result<String> {
        let filename = format!("processed_{}.jpg", Uuid::new_v4());
        let staging = TempDir::new_in(&self.root, STAGING_PREFIX)
            .with_context(|| format!("Failed to create staging directory in {:?}", self.root))?;

        let staged_path = staging.path().join(&filename);
        DynamicImage::ImageRgb8(image.to_rgb8())
            .save_with_format(&staged_path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to encode visualization {:?}", staged_path))?;

        let dest_path = self.root.join(&filename);
        std::fs::rename(&staged_path, &dest_path)
            .with_context(|| format!("Failed to publish visualization {:?}", dest_path))?;

        Ok(filename)
    }

    /// Path of a stored file; `None` for anything but a plain existing file name
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let mut components = Path::new(filename).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain || filename.starts_with(STAGING_PREFIX) {
            return None;
        }

        let path = self.root.join(filename);
        path.is_file().then_some(path)
    }

    /// Delete a stored file; unknown names are ignored
    pub fn remove(&self, filename: &str) -> anyhow::Result<()> {
        if let Some(path) = self.resolve(filename) {
            std::fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        }
        Ok(())
    }

    pub fn url_for(filename: &str) -> String {
        format!("/media/{}", filename)
    }

    pub fn content_type(filename: &str) -> &'static str {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "image/jpeg",
        }
    }
}
