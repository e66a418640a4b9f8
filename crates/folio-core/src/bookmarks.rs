//! Bookmark manager: the session's most-recent-first view of a bookmark
//! store.

use crate::document::DocumentId;
use crate::navigation::CurrentPosition;
use crate::outline::{OutlineEntry, containing_entry};
use crate::store::{Bookmark, BookmarkStore, NewBookmark};
use crate::{ReaderError, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct BookmarkManager {
    doc: DocumentId,
    store: Arc<dyn BookmarkStore>,
    bookmarks: Vec<Bookmark>,
}

impl BookmarkManager {
    pub fn new(doc: DocumentId, store: Arc<dyn BookmarkStore>) -> Self {
        Self {
            doc,
            store,
            bookmarks: Vec::new(),
        }
    }

    /// Load the list once. A failing store leaves the list empty.
    pub async fn load(&mut self) {
        match self.store.list(&self.doc).await {
            Ok(bookmarks) => {
                info!(doc = %self.doc, count = bookmarks.len(), "Loaded bookmarks");
                self.bookmarks = bookmarks;
            }
            Err(err) => {
                warn!(doc = %self.doc, "Failed to load bookmarks: {err:#}");
                self.bookmarks.clear();
            }
        }
    }

    pub fn list(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn find(&self, id: u64) -> Option<&Bookmark> {
        self.bookmarks.iter().find(|bookmark| bookmark.id == id)
    }

    /// Bookmark the current position, persist it, then prepend it.
    pub async fn create(
        &mut self,
        position: &CurrentPosition,
        outline: &[OutlineEntry],
    ) -> Result<Bookmark> {
        let label = bookmark_label(outline, position);
        let created = self
            .store
            .create(
                &self.doc,
                NewBookmark {
                    identifier: position.identifier.clone(),
                    label: Some(label),
                },
            )
            .await
            .map_err(|err| {
                warn!(doc = %self.doc, "Failed to create bookmark: {err:#}");
                ReaderError::persistence("create bookmark", &err)
            })?;
        info!(doc = %self.doc, id = created.id, identifier = %created.identifier, "Created bookmark");
        self.bookmarks.insert(0, created.clone());
        Ok(created)
    }

    /// Remove from the store, then from the list.
    pub async fn delete(&mut self, id: u64) -> Result<()> {
        self.store.delete(&self.doc, id).await.map_err(|err| {
            warn!(doc = %self.doc, id, "Failed to delete bookmark: {err:#}");
            ReaderError::persistence("delete bookmark", &err)
        })?;
        self.bookmarks.retain(|bookmark| bookmark.id != id);
        info!(doc = %self.doc, id, "Deleted bookmark");
        Ok(())
    }
}

/// `"<outline label> (<NN>%)"`, degrading to whichever half is known.
///
/// The outline entry is the one containing the percentage; without a
/// percentage, the entry pointing at the current section.
pub fn bookmark_label(outline: &[OutlineEntry], position: &CurrentPosition) -> String {
    let chapter = match position.percentage {
        Some(pct) => containing_entry(outline, pct),
        None => position
            .section
            .as_deref()
            .and_then(|href| entry_for_section(outline, href)),
    }
    .map(|entry| entry.label.trim())
    .filter(|label| !label.is_empty());
    let rounded = position
        .percentage
        .map(|pct| (pct.clamp(0.0, 1.0) * 100.0).round() as u32);

    match (chapter, rounded) {
        (Some(label), Some(pct)) => format!("{label} ({pct}%)"),
        (None, Some(pct)) => format!("{pct}%"),
        (Some(label), None) => label.to_string(),
        (None, None) => "Bookmark".to_string(),
    }
}

fn entry_for_section<'a>(outline: &'a [OutlineEntry], href: &str) -> Option<&'a OutlineEntry> {
    outline.iter().find_map(|entry| {
        let matches = entry
            .target
            .as_deref()
            .map(|target| target.split('#').next().unwrap_or(target))
            .is_some_and(|path| {
                !path.is_empty() && (href == path || href.ends_with(&format!("/{path}")))
            });
        if matches {
            Some(entry)
        } else {
            entry_for_section(&entry.children, href)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBookmarkStore;

    fn chapters() -> Vec<OutlineEntry> {
        ["Chapter 1", "Chapter 2", "Chapter 3"]
            .iter()
            .enumerate()
            .map(|(idx, label)| OutlineEntry {
                label: label.to_string(),
                target: Some(format!("ch{}.xhtml", idx + 1)),
                percentage: Some(idx as f64 * 0.3),
                children: Vec::new(),
            })
            .collect()
    }

    fn at(percentage: Option<f64>) -> CurrentPosition {
        CurrentPosition {
            identifier: "epubcfi(/6/6!/4:120)".into(),
            percentage,
            section: Some("OEBPS/ch2.xhtml".into()),
            page: None,
            at_end: false,
            seq: 1,
        }
    }

    #[test]
    fn labels_degrade_gracefully() {
        assert_eq!(bookmark_label(&chapters(), &at(Some(0.37))), "Chapter 2 (37%)");
        assert_eq!(bookmark_label(&[], &at(Some(0.374))), "37%");
        assert_eq!(bookmark_label(&chapters(), &at(None)), "Chapter 2");
        assert_eq!(bookmark_label(&[], &at(None)), "Bookmark");
    }

    #[tokio::test]
    async fn create_prepends_and_delete_removes() {
        let store = Arc::new(MemoryBookmarkStore::new());
        let mut manager = BookmarkManager::new("doc".into(), store.clone());
        manager.load().await;

        let first = manager.create(&at(Some(0.1)), &chapters()).await.unwrap();
        let second = manager.create(&at(Some(0.37)), &chapters()).await.unwrap();
        assert_eq!(manager.list()[0].id, second.id);
        assert_eq!(second.label.as_deref(), Some("Chapter 2 (37%)"));

        manager.delete(first.id).await.unwrap();
        assert!(manager.find(first.id).is_none());
        assert_eq!(store.stored(&"doc".into()).len(), 1);
        assert!(manager.delete(first.id).await.is_err());
    }

    #[tokio::test]
    async fn failed_list_leaves_empty_list() {
        let store = Arc::new(MemoryBookmarkStore::new());
        store.set_failing(true);
        let mut manager = BookmarkManager::new("doc".into(), store);
        manager.load().await;
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_bookmark_listed() {
        let store = Arc::new(MemoryBookmarkStore::new());
        let mut manager = BookmarkManager::new("doc".into(), store.clone());
        let created = manager.create(&at(None), &[]).await.unwrap();
        store.set_failing(true);
        let err = manager.delete(created.id).await.unwrap_err();
        assert_eq!(err.category(), "persistence");
        assert!(manager.find(created.id).is_some());
    }
}
