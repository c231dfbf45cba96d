//! Durable blob storage.
//!
//! Each store (response cache, credential pool) owns exactly one
//! [`BlobStore`] and is its only writer. The trait covers whole-blob read
//! and whole-blob replace; other backends plug in via the builder.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{MimirError, Result};

/// Whole-blob durable storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the stored blob. `Ok(None)` when nothing has been written yet.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob.
    async fn save(&self, bytes: &[u8]) -> Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// File-backed blob store with atomic replace (write tmp, then rename).
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
    private: bool,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            private: false,
        }
    }

    /// Store for secrets. On Unix the file is created with mode `0600`
    /// before any byte is written.
    pub fn private(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            private: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored blob");
                Ok(None)
            }
            Err(e) => Err(MimirError::StorageUnavailable(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MimirError::StorageUnavailable(format!(
                    "failed to create dir {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let tmp_path = self.tmp_path();
        write_tmp(&tmp_path, bytes, self.private).await.map_err(|e| {
            MimirError::StorageUnavailable(format!(
                "failed to write {}: {e}",
                tmp_path.display()
            ))
        })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| {
                MimirError::StorageUnavailable(format!(
                    "failed to rename {} → {}: {e}",
                    tmp_path.display(),
                    self.path.display()
                ))
            })?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

async fn write_tmp(path: &Path, bytes: &[u8], private: bool) -> std::io::Result<()> {
    if !private {
        return tokio::fs::write(path, bytes).await;
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    // a leftover tmp file keeps its old mode through open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(bytes).await?;
    file.flush().await
}

/// In-memory blob store. Useful for tests and for running without a disk.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blob: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `bytes`.
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: Mutex::new(Some(bytes.into())),
            ..Self::default()
        }
    }

    /// Current contents, if any.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.blob.lock().ok().and_then(|b| b.clone())
    }

    /// Make subsequent writes fail with `StorageUnavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        self.blob
            .lock()
            .map(|b| b.clone())
            .map_err(|_| MimirError::StorageUnavailable("memory store poisoned".into()))
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MimirError::StorageUnavailable(
                "memory store rejecting writes".into(),
            ));
        }
        let mut blob = self
            .blob
            .lock()
            .map_err(|_| MimirError::StorageUnavailable("memory store poisoned".into()))?;
        *blob = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
