//! Content sources: where document metadata and bytes come from.

use crate::document::{DocumentId, DocumentMetadata};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Returns document metadata and raw content bytes by id.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn metadata(&self, id: &DocumentId) -> Result<DocumentMetadata>;
    async fn content(&self, id: &DocumentId) -> Result<Vec<u8>>;
}

/// Serves documents from the local filesystem; the id is the file path.
///
/// The format label is the upper-cased file extension, the title the file
/// stem.
#[derive(Debug, Clone, Default)]
pub struct FsContentSource;

#[async_trait]
impl ContentSource for FsContentSource {
    async fn metadata(&self, id: &DocumentId) -> Result<DocumentMetadata> {
        let path = Path::new(id.as_str());
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if !meta.is_file() {
            return Err(anyhow!("{} is not a file", path.display()));
        }
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_uppercase())
            .unwrap_or_default();
        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("book")
            .to_string();
        Ok(DocumentMetadata { title, format })
    }

    async fn content(&self, id: &DocumentId) -> Result<Vec<u8>> {
        let path = Path::new(id.as_str());
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

struct MemoryEntry {
    metadata: DocumentMetadata,
    content: Option<Vec<u8>>,
}

/// In-memory content source. Documents registered without content answer
/// metadata requests but fail content fetches.
#[derive(Default)]
pub struct MemoryContentSource {
    entries: Mutex<HashMap<DocumentId, MemoryEntry>>,
    content_fetches: Mutex<Vec<DocumentId>>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        id: impl Into<DocumentId>,
        title: &str,
        format: &str,
        content: Option<Vec<u8>>,
    ) {
        let entry = MemoryEntry {
            metadata: DocumentMetadata {
                title: title.to_string(),
                format: format.to_string(),
            },
            content,
        };
        lock(&self.entries).insert(id.into(), entry);
    }

    /// Ids whose content was requested, in order.
    pub fn content_fetches(&self) -> Vec<DocumentId> {
        lock(&self.content_fetches).clone()
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn metadata(&self, id: &DocumentId) -> Result<DocumentMetadata> {
        lock(&self.entries)
            .get(id)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| anyhow!("document {id} not found"))
    }

    async fn content(&self, id: &DocumentId) -> Result<Vec<u8>> {
        lock(&self.content_fetches).push(id.clone());
        lock(&self.entries)
            .get(id)
            .and_then(|entry| entry.content.clone())
            .ok_or_else(|| anyhow!("content for {id} is unavailable"))
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
