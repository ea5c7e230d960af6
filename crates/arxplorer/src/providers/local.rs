//! Local implementations of the store providers
//!
//! Filesystem blob store and in-memory index store for development and
//! tests; production deployments inject cloud-backed implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::blob_store::BlobStore;
use super::index_store::IndexStore;

/// Blob store over a local directory; keys map to relative file paths
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                keys.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.path_for(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, data)?;
        Ok(())
    }

    async fn upload_public(&self, path: &str, data: &[u8]) -> Result<String> {
        self.upload(path, data).await?;
        // Local files are as public as they get
        Ok(format!("file://{}", self.path_for(path).display()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.path_for(path);
        std::fs::read(&target)
            .map_err(|e| Error::store(format!("blob '{}' unavailable: {}", path, e)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root.clone(), &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.list(prefix).await? {
            if let Err(e) = std::fs::remove_file(self.path_for(&key)) {
                tracing::warn!("Couldn't delete blob '{}': {}", key, e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "local-fs"
    }
}

/// In-memory index store
#[derive(Default)]
pub struct MemoryIndexStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn get(&self, paper_id: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(paper_id).cloned())
    }

    async fn set(&self, paper_id: &str, payload: &str) -> Result<()> {
        self.entries
            .write()
            .insert(paper_id.to_string(), payload.to_string());
        Ok(())
    }

    async fn delete(&self, paper_id: &str) -> Result<()> {
        self.entries.write().remove(paper_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
