//! File-based storage operations for profile records

use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::debug;

/// Extension of profile record files
pub const PROFILE_EXTENSION: &str = "json";

/// Subdirectory receiving copies of unreadable records
pub const CORRUPT_DIR: &str = "corrupt";

/// File-based storage for profile records with atomic write support
#[derive(Debug)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a new file storage instance
    ///
    /// # Error Recovery
    ///
    /// Creates the base directory if it doesn't exist.
    /// Returns an error if directory creation fails.
    pub async fn new(base_dir: &Path) -> anyhow::Result<Self> {
        async_fs::create_dir_all(base_dir)
            .await
            .with_context(|| format!("Failed to create storage directory: {:?}", base_dir))?;

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    /// Write content to a file atomically
    ///
    /// # Error Recovery
    ///
    /// Uses atomic write pattern:
    /// 1. Write to temporary file
    /// 2. Rename temp file to target
    /// 3. Original file is preserved if write fails
    pub async fn write_atomic(&self, path: &Path, content: &str) -> anyhow::Result<()> {
        debug!(path = ?path, "Writing file atomically");

        let temp_path = path.with_extension("tmp");

        async_fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write temp file: {:?}", temp_path))?;

        async_fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to rename temp file to target: {:?}", path))?;

        debug!(path = ?path, "File written successfully");
        Ok(())
    }

    /// Read file content as string; `None` when the file does not exist
    pub async fn read_optional(&self, path: &Path) -> anyhow::Result<Option<String>> {
        match async_fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read file: {:?}", path)),
        }
    }

    /// Delete a file, returning whether it existed
    pub async fn delete(&self, path: &Path) -> anyhow::Result<bool> {
        match async_fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete file: {:?}", path)),
        }
    }

    /// List all profile files in the storage directory
    pub async fn list_profile_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let mut entries = async_fs::read_dir(&self.base_dir)
            .await
            .with_context(|| format!("Failed to read directory: {:?}", self.base_dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some(PROFILE_EXTENSION) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Copy an unreadable record aside so a later save cannot destroy it
    pub async fn preserve_corrupt(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("profile");
        let target_dir = self.base_dir.join(CORRUPT_DIR);
        let target = target_dir.join(format!("{}_{}.json.bak", stem, timestamp));

        async_fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("Failed to create directory: {:?}", target_dir))?;

        async_fs::copy(source, &target)
            .await
            .with_context(|| format!("Failed to copy corrupt record: {:?}", target))?;

        debug!(source = ?source, copy = ?target, "Corrupt record preserved");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    async fn create_test_storage() -> Result<(FileStorage, TempDir), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let storage = FileStorage::new(temp_dir.path()).await?;
        Ok((storage, temp_dir))
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() -> TestResult {
        let (storage, temp_dir) = create_test_storage().await?;
        let file_path = temp_dir.path().join("test.json");

        storage.write_atomic(&file_path, r#"{"test": "data"}"#).await?;

        assert!(file_path.exists());
        assert!(!file_path.with_extension("tmp").exists());
        let content = storage.read_optional(&file_path).await?;
        assert_eq!(content.as_deref(), Some(r#"{"test": "data"}"#));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_nonexistent_file_is_none() -> TestResult {
        let (storage, temp_dir) = create_test_storage().await?;
        let content = storage.read_optional(&temp_dir.path().join("missing.json")).await?;
        assert!(content.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_reports_existence() -> TestResult {
        let (storage, temp_dir) = create_test_storage().await?;
        let file_path = temp_dir.path().join("delete_me.json");
        storage.write_atomic(&file_path, "{}").await?;

        assert!(storage.delete(&file_path).await?);
        assert!(!storage.delete(&file_path).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_profile_files_filters_extension() -> TestResult {
        let (storage, temp_dir) = create_test_storage().await?;
        storage.write_atomic(&temp_dir.path().join("a.json"), "{}").await?;
        storage.write_atomic(&temp_dir.path().join("b.json"), "{}").await?;
        storage.write_atomic(&temp_dir.path().join("notes.txt"), "text").await?;

        assert_eq!(storage.list_profile_files().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_preserve_corrupt_copies_into_subdir() -> TestResult {
        let (storage, temp_dir) = create_test_storage().await?;
        let file_path = temp_dir.path().join("broken.json");
        storage.write_atomic(&file_path, "{ truncated").await?;

        let copy = storage.preserve_corrupt(&file_path).await?;
        assert!(copy.exists());
        assert!(copy.starts_with(temp_dir.path().join(CORRUPT_DIR)));
        assert!(file_path.exists());
        Ok(())
    }
}
