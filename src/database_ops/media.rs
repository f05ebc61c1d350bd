//! Artwork storage. Paths are relative to the provider's media root,
//! e.g. `cover_big/co1abc.jpg`.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    async fn exists(&self, relpath: &str) -> Result<bool>;
    async fn write(&self, relpath: &str, data: Bytes) -> Result<()>;
}

/// Relative path of an IGDB image: `{size}/{image_id}.jpg`.
pub fn cover_relpath(size: &str, image_id: &str) -> String {
    format!("{size}/{image_id}.jpg")
}

pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{MEDIA_ROOT}/igdb`
    pub fn for_provider(media_root: &Path, provider: &str) -> Self {
        Self::new(media_root.join(provider))
    }

    fn resolve(&self, relpath: &str) -> PathBuf {
        self.root.join(relpath.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl MediaStore for FsMediaStore {
    async fn exists(&self, relpath: &str) -> Result<bool> {
        tokio::fs::try_exists(self.resolve(relpath))
            .await
            .with_context(|| format!("checking media path {relpath}"))
    }

    async fn write(&self, relpath: &str, data: Bytes) -> Result<()> {
        let path = self.resolve(relpath);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

#[derive(Default)]
pub struct MemoryMediaStore {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, relpath: &str) -> Option<Bytes> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(relpath)
            .cloned()
    }
}

#[async_trait::async_trait]
impl MediaStore for MemoryMediaStore {
    async fn exists(&self, relpath: &str) -> Result<bool> {
        Ok(self.get(relpath).is_some())
    }

    async fn write(&self, relpath: &str, data: Bytes) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(relpath.to_string(), data);
        Ok(())
    }
}
