//! Durable asset storage.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Object storage for migrated images.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `bytes` under `path`, overwriting anything already there.
    /// Returns the stored path.
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String>;

    /// Remove a stored path. Missing paths are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// A collision-resistant path: `{prefix}/{YYYYMMDD}-{uuid}.{extension}`.
    fn generate_unique_filename(&self, prefix: &str, extension: &str) -> String {
        let prefix = prefix.trim_matches('/');
        let extension = extension.trim_start_matches('.');
        let name = format!(
            "{}-{}.{}",
            Utc::now().format("%Y%m%d"),
            uuid::Uuid::new_v4(),
            extension
        );
        if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        }
    }
}

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored path. Rejects paths escaping the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid asset path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        debug!("Stored {} ({}, {} bytes)", path, content_type, bytes.len());
        Ok(path.trim_start_matches('/').to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!("Removed {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", target.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::tempdir;

    #[test]
    fn unique_filenames_are_date_prefixed_and_distinct() {
        let store = LocalAssetStore::new("/tmp/unused");
        let a = store.generate_unique_filename("covers/", ".jpg");
        let b = store.generate_unique_filename("covers", "jpg");
        let pattern = Regex::new(r"^covers/\d{8}-[0-9a-f-]{36}\.jpg$").unwrap();
        assert!(pattern.is_match(&a), "{}", a);
        assert!(pattern.is_match(&b), "{}", b);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn upload_overwrites_by_path() {
        let dir = tempdir().unwrap();
        let store = LocalAssetStore::new(dir.path());

        let path = store
            .upload(b"first", "chapters/1/a.png", "image/png")
            .await
            .unwrap();
        store.upload(b"second", &path, "image/png").await.unwrap();

        let stored = std::fs::read(dir.path().join("chapters/1/a.png")).unwrap();
        assert_eq!(stored, b"second");
    }

    #[tokio::test]
    async fn delete_removes_and_tolerates_missing_paths() {
        let dir = tempdir().unwrap();
        let store = LocalAssetStore::new(dir.path());
        let path = store.upload(b"x", "covers/a.jpg", "image/jpeg").await.unwrap();

        store.delete(&path).await.unwrap();
        assert!(!dir.path().join("covers/a.jpg").exists());
        store.delete(&path).await.unwrap();
        assert!(store.delete("../outside.jpg").await.is_err());
    }

    #[tokio::test]
    async fn upload_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        let store = LocalAssetStore::new(dir.path());
        assert!(store.upload(b"x", "../evil.png", "image/png").await.is_err());
    }
}
