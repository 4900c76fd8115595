//! Object storage for persisted partitions.
//!
//! A [`BlobStore`] is a flat key → bytes map. Two backends exist:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `s3` | [`S3BlobStore`](crate::s3::S3BlobStore) | SigV4-signed REST calls; MinIO/LocalStack via `endpoint_url` |
//! | `filesystem` | [`FsBlobStore`] | keys are relative paths under `storage.root` |
//!
//! A missing key is `Ok(None)`, never an error. Every call made through
//! [`get_with_timeout`] and [`put_with_timeout`] is bounded by the configured timeout.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::s3::S3BlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read an object; `Ok(None)` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite an object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// [`BlobStore::get`] bounded by `timeout`.
pub async fn get_with_timeout(
    store: &dyn BlobStore,
    key: &str,
    timeout: Duration,
) -> Result<Option<Vec<u8>>> {
    tokio::time::timeout(timeout, store.get(key))
        .await
        .with_context(|| format!("timed out after {:?} reading '{}'", timeout, key))?
}

/// [`BlobStore::put`] bounded by `timeout`.
pub async fn put_with_timeout(
    store: &dyn BlobStore,
    key: &str,
    bytes: Vec<u8>,
    content_type: &str,
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, store.put(key, bytes, content_type))
        .await
        .with_context(|| format!("timed out after {:?} writing '{}'", timeout, key))?
}

// ============ Filesystem ============

/// Stores each key as a file under `root`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid blob key: '{}'", key);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Build the configured backend.
pub fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "filesystem" => Ok(Arc::new(FsBlobStore::new(config.root.clone()))),
        "s3" => Ok(Arc::new(S3BlobStore::new(config)?)),
        other => bail!("Unknown storage backend: {}", other),
    }
}
