//! Progress and bookmark stores.
//!
//! The file-backed store keeps one directory per document under the cache
//! root, named by a SHA-256 of the document id, with two tiny TOML files:
//! `progress.toml` and `bookmarks.toml`.

use crate::document::DocumentId;
use crate::source::lock;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use ts_rs::TS;

/// One progress row per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SavedProgress {
    /// `None` for the default row of a document that was never read.
    pub identifier: Option<String>,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub last_read: Option<DateTime<Utc>>,
}

impl SavedProgress {
    /// The identifier to restore, if the row is not the default row.
    pub fn restore_target(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .filter(|identifier| !identifier.trim().is_empty())
    }
}

/// Upsert payload for the progress store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub identifier: String,
    pub percentage: f64,
    pub finished: bool,
}

/// A user-anchored position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Bookmark {
    pub id: u64,
    pub identifier: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create payload; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub identifier: String,
    pub label: Option<String>,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, doc: &DocumentId) -> Result<Option<SavedProgress>>;
    async fn save(&self, doc: &DocumentId, update: &ProgressUpdate) -> Result<SavedProgress>;
}

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Most recent first.
    async fn list(&self, doc: &DocumentId) -> Result<Vec<Bookmark>>;
    async fn create(&self, doc: &DocumentId, bookmark: NewBookmark) -> Result<Bookmark>;
    /// Deleting an id that does not exist is an error.
    async fn delete(&self, doc: &DocumentId, id: u64) -> Result<()>;
}

/// Directory for a document's records under `root`.
pub fn hash_dir(root: &Path, doc: &DocumentId) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(doc.as_str().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    root.join(hash)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookmarkFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

/// TOML files under a cache root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn progress_path(&self, doc: &DocumentId) -> PathBuf {
        hash_dir(&self.root, doc).join("progress.toml")
    }

    fn bookmarks_path(&self, doc: &DocumentId) -> PathBuf {
        hash_dir(&self.root, doc).join("bookmarks.toml")
    }

    async fn read_bookmarks(&self, doc: &DocumentId) -> Result<BookmarkFile> {
        let path = self.bookmarks_path(doc);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => toml::from_str(&data)
                .with_context(|| format!("Invalid bookmark file {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BookmarkFile::default()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    async fn write_bookmarks(&self, doc: &DocumentId, file: &BookmarkFile) -> Result<()> {
        let contents = toml::to_string(file).context("Failed to serialize bookmarks")?;
        write_file(&self.bookmarks_path(doc), &contents).await
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create cache dir {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[async_trait]
impl ProgressStore for FileStore {
    async fn load(&self, doc: &DocumentId) -> Result<Option<SavedProgress>> {
        let path = self.progress_path(doc);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(%doc, "No saved progress");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let saved = toml::from_str(&data)
            .with_context(|| format!("Invalid progress file {}", path.display()))?;
        Ok(Some(saved))
    }

    async fn save(&self, doc: &DocumentId, update: &ProgressUpdate) -> Result<SavedProgress> {
        let saved = SavedProgress {
            identifier: Some(update.identifier.clone()),
            percentage: update.percentage,
            finished: update.finished,
            last_read: Some(Utc::now()),
        };
        let contents = toml::to_string(&saved).context("Failed to serialize progress")?;
        write_file(&self.progress_path(doc), &contents).await?;
        Ok(saved)
    }
}

#[async_trait]
impl BookmarkStore for FileStore {
    async fn list(&self, doc: &DocumentId) -> Result<Vec<Bookmark>> {
        let mut bookmarks = self.read_bookmarks(doc).await?.bookmarks;
        sort_recent_first(&mut bookmarks);
        Ok(bookmarks)
    }

    async fn create(&self, doc: &DocumentId, bookmark: NewBookmark) -> Result<Bookmark> {
        let mut file = self.read_bookmarks(doc).await?;
        file.next_id = file.next_id.max(1);
        let created = Bookmark {
            id: file.next_id,
            identifier: bookmark.identifier,
            label: bookmark.label,
            created_at: Utc::now(),
        };
        file.next_id += 1;
        file.bookmarks.push(created.clone());
        self.write_bookmarks(doc, &file).await?;
        Ok(created)
    }

    async fn delete(&self, doc: &DocumentId, id: u64) -> Result<()> {
        let mut file = self.read_bookmarks(doc).await?;
        let before = file.bookmarks.len();
        file.bookmarks.retain(|bookmark| bookmark.id != id);
        if file.bookmarks.len() == before {
            return Err(anyhow!("bookmark {id} not found"));
        }
        self.write_bookmarks(doc, &file).await
    }
}

fn sort_recent_first(bookmarks: &mut [Bookmark]) {
    bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// In-memory progress store that records every save.
#[derive(Default)]
pub struct MemoryProgressStore {
    rows: Mutex<HashMap<DocumentId, SavedProgress>>,
    saves: Mutex<Vec<(DocumentId, ProgressUpdate)>>,
    failing: AtomicBool,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a row, e.g. the default row with no identifier.
    pub fn insert(&self, doc: impl Into<DocumentId>, row: SavedProgress) {
        lock(&self.rows).insert(doc.into(), row);
    }

    /// Make every following call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every successful save, in order.
    pub fn saves(&self) -> Vec<(DocumentId, ProgressUpdate)> {
        lock(&self.saves).clone()
    }

    pub fn saves_for(&self, doc: &DocumentId) -> Vec<ProgressUpdate> {
        lock(&self.saves)
            .iter()
            .filter(|(id, _)| id == doc)
            .map(|(_, update)| update.clone())
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("progress store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, doc: &DocumentId) -> Result<Option<SavedProgress>> {
        self.check()?;
        Ok(lock(&self.rows).get(doc).cloned())
    }

    async fn save(&self, doc: &DocumentId, update: &ProgressUpdate) -> Result<SavedProgress> {
        self.check()?;
        let saved = SavedProgress {
            identifier: Some(update.identifier.clone()),
            percentage: update.percentage,
            finished: update.finished,
            last_read: Some(Utc::now()),
        };
        lock(&self.rows).insert(doc.clone(), saved.clone());
        lock(&self.saves).push((doc.clone(), update.clone()));
        Ok(saved)
    }
}

/// In-memory bookmark store.
#[derive(Default)]
pub struct MemoryBookmarkStore {
    rows: Mutex<HashMap<DocumentId, Vec<Bookmark>>>,
    next_id: Mutex<u64>,
    failing: AtomicBool,
}

impl MemoryBookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current rows for `doc` without going through the trait.
    pub fn stored(&self, doc: &DocumentId) -> Vec<Bookmark> {
        lock(&self.rows).get(doc).cloned().unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("bookmark store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BookmarkStore for MemoryBookmarkStore {
    async fn list(&self, doc: &DocumentId) -> Result<Vec<Bookmark>> {
        self.check()?;
        let mut bookmarks = self.stored(doc);
        sort_recent_first(&mut bookmarks);
        Ok(bookmarks)
    }

    async fn create(&self, doc: &DocumentId, bookmark: NewBookmark) -> Result<Bookmark> {
        self.check()?;
        let id = {
            let mut next = lock(&self.next_id);
            *next += 1;
            *next
        };
        let created = Bookmark {
            id,
            identifier: bookmark.identifier,
            label: bookmark.label,
            created_at: Utc::now(),
        };
        lock(&self.rows)
            .entry(doc.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn delete(&self, doc: &DocumentId, id: u64) -> Result<()> {
        self.check()?;
        let mut rows = lock(&self.rows);
        let bookmarks = rows.entry(doc.clone()).or_default();
        let before = bookmarks.len();
        bookmarks.retain(|bookmark| bookmark.id != id);
        if bookmarks.len() == before {
            return Err(anyhow!("bookmark {id} not found"));
        }
        Ok(())
    }
}
