//! `BlobStore` implementations.

use super::atomic_file::AtomicFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_core::storage::BlobStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// In-process store, used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Directory structure:
/// ```text
/// base_dir/
/// ├── chat.sessions.json
/// └── chat.transferred_sessions.json
/// ```
pub struct JsonFileBlobStore {
    base_dir: PathBuf,
}

impl JsonFileBlobStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_for(&self, key: &str) -> AtomicFile {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        AtomicFile::new(self.base_dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl BlobStore for JsonFileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let file = self.file_for(key);
        tokio::task::spawn_blocking(move || file.load())
            .await
            .context("blob read task panicked")?
            .with_context(|| format!("Failed to read blob '{}'", key))
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        let file = self.file_for(key);
        let value = value.to_string();
        tokio::task::spawn_blocking(move || file.save(&value))
            .await
            .context("blob write task panicked")?
            .with_context(|| format!("Failed to write blob '{}'", key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let file = self.file_for(key);
        tokio::task::spawn_blocking(move || file.remove())
            .await
            .context("blob remove task panicked")?
            .with_context(|| format!("Failed to remove blob '{}'", key))
    }
}
