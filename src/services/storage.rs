use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::models::UploadedAsset;
use crate::utils::filename::{FilenameGenerator, derive_output_name, split_name};

/// The two transient holding areas: incoming uploads and processed outputs.
///
/// Both paths are absolute once constructed; the engine receives `file://`
/// locators built from them.
pub struct LocalStorage {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    names: FilenameGenerator,
}

impl LocalStorage {
    /// Creates both directories (optionally wiping leftovers) and resolves them
    /// to absolute paths.
    pub async fn init(upload_dir: &Path, processed_dir: &Path, clear: bool) -> Result<Self> {
        for dir in [upload_dir, processed_dir] {
            if clear && tokio::fs::try_exists(dir).await.unwrap_or(false) {
                clear_dir(dir).await?;
            }
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        Ok(Self {
            upload_dir: tokio::fs::canonicalize(upload_dir).await?,
            processed_dir: tokio::fs::canonicalize(processed_dir).await?,
            names: FilenameGenerator::new(),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Where the output for `base_name` lives: `<processed_dir>/<base>.png`
    pub fn processed_path(&self, base_name: &str) -> PathBuf {
        self.processed_dir.join(derive_output_name(base_name))
    }

    /// Opens a freshly named file in the upload directory for streaming writes.
    pub async fn create_upload(&self, extension: &str) -> Result<(PathBuf, tokio::fs::File)> {
        let filename = self.names.next_name(extension);
        let path = self.upload_dir.join(&filename);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to create upload file {}", path.display()))?;
        Ok((path, file))
    }

    /// Writes an in-memory upload in one go and describes it.
    pub async fn store_upload(
        &self,
        data: Bytes,
        extension: &str,
        mime_type: &str,
    ) -> Result<UploadedAsset> {
        let (path, mut file) = self.create_upload(extension).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(describe_upload(path, mime_type, extension, data.len() as u64))
    }
}

/// Builds the asset record for a file already written under the upload directory.
pub fn describe_upload(path: PathBuf, mime_type: &str, extension: &str, size: u64) -> UploadedAsset {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let (base_name, _) = split_name(&filename);

    UploadedAsset {
        filename,
        base_name,
        path,
        mime_type: mime_type.to_string(),
        extension: extension.to_string(),
        size,
    }
}

async fn clear_dir(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let res = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match res {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to clear {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        tracing::info!("🧹 Cleared {} leftover entries from {}", removed, dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_and_clears() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");
        let processed = root.path().join("public/processed");

        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("stale.jpg"), b"old").unwrap();

        let storage = LocalStorage::init(&uploads, &processed, true).await.unwrap();
        assert!(storage.processed_dir().is_absolute());
        assert!(processed.exists());
        assert!(!uploads.join("stale.jpg").exists());
    }

    #[tokio::test]
    async fn test_init_keeps_files_without_clear() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("keep.png"), b"keep").unwrap();

        LocalStorage::init(&uploads, &root.path().join("out"), false)
            .await
            .unwrap();
        assert!(uploads.join("keep.png").exists());
    }

    #[tokio::test]
    async fn test_store_upload_and_paths() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalStorage::init(&root.path().join("in"), &root.path().join("out"), true)
            .await
            .unwrap();

        let asset = storage
            .store_upload(Bytes::from_static(b"jpegbytes"), "jpg", "image/jpeg")
            .await
            .unwrap();
        assert!(asset.filename.ends_with(".jpg"));
        assert_eq!(asset.size, 9);
        assert_eq!(asset.extension, "jpg");
        assert!(asset.path.starts_with(storage.upload_dir()));
        assert_eq!(std::fs::read(&asset.path).unwrap(), b"jpegbytes");

        let out = storage.processed_path(&asset.base_name);
        assert_eq!(out.extension().unwrap(), "png");
        assert_eq!(out.file_stem().unwrap().to_str().unwrap(), asset.base_name);
        assert!(out.starts_with(storage.processed_dir()));
    }
}
