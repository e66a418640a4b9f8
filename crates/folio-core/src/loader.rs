//! Document loading: fetch metadata and bytes, then parse them once for the
//! format family the metadata declares.

use crate::document::{Document, DocumentId, FormatFamily};
use crate::outline::OutlineNode;
use crate::source::ContentSource;
use crate::{ReaderError, Result, epub_loader, pdf_loader};
use std::sync::Arc;
use tracing::{info, warn};

/// One spine item of a reflowable document, flattened to text.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub href: String,
    pub text: String,
    /// Fragment ids and their byte offsets into `text`.
    pub anchors: Vec<(String, usize)>,
}

impl Section {
    pub fn new(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: text.into(),
            anchors: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, id: impl Into<String>, offset: usize) -> Self {
        self.anchors.push((id.into(), offset));
        self
    }

    pub fn anchor_offset(&self, id: &str) -> Option<usize> {
        self.anchors
            .iter()
            .find(|(anchor, _)| anchor == id)
            .map(|(_, offset)| (*offset).min(self.text.len()))
    }

    /// Whether an outline path refers to this section. Outline paths are
    /// usually relative to the navigation document, so a suffix match on a
    /// path segment boundary is accepted.
    pub fn matches_path(&self, path: &str) -> bool {
        let path = path.trim().trim_start_matches("./");
        if path.is_empty() {
            return false;
        }
        self.href == path
            || self
                .href
                .strip_suffix(path)
                .is_some_and(|prefix| prefix.ends_with('/'))
    }
}

/// Parsed reflowable payload.
#[derive(Debug, Clone, Default)]
pub struct ReflowContent {
    pub sections: Vec<Section>,
    pub toc: Vec<OutlineNode>,
}

/// Parsed fixed-layout payload.
#[derive(Debug, Clone)]
pub struct FixedLayoutContent {
    pub page_count: u32,
    pub outline: OutlineWalk,
}

impl FixedLayoutContent {
    pub fn new(page_count: u32, outline: Vec<OutlineNode>) -> Self {
        Self {
            page_count,
            outline: OutlineWalk::Nodes(outline),
        }
    }
}

/// A fixed-layout outline that may still need walking.
#[derive(Clone)]
pub enum OutlineWalk {
    /// Raw PDF bytes whose outline has not been walked yet.
    Pdf(Arc<[u8]>),
    /// Outline already materialized.
    Nodes(Vec<OutlineNode>),
}

impl std::fmt::Debug for OutlineWalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutlineWalk::Pdf(bytes) => write!(f, "OutlineWalk::Pdf({} bytes)", bytes.len()),
            OutlineWalk::Nodes(nodes) => f.debug_tuple("OutlineWalk::Nodes").field(nodes).finish(),
        }
    }
}

impl OutlineWalk {
    /// Materialize the outline, resolving named destinations off the
    /// scheduler thread.
    pub async fn resolve(self) -> anyhow::Result<Vec<OutlineNode>> {
        match self {
            OutlineWalk::Nodes(nodes) => Ok(nodes),
            OutlineWalk::Pdf(bytes) => {
                tokio::task::spawn_blocking(move || pdf_loader::read_outline_from(&bytes)).await?
            }
        }
    }
}

/// Format-specific content of a loaded document.
#[derive(Debug, Clone)]
pub enum BookContent {
    Reflowable(ReflowContent),
    FixedLayout(FixedLayoutContent),
    PlainText(String),
}

/// Parses raw bytes for each format family.
pub trait FormatParser: Send + Sync {
    fn parse_reflowable(&self, bytes: &[u8]) -> anyhow::Result<ReflowContent>;
    fn parse_fixed_layout(&self, bytes: &[u8]) -> anyhow::Result<FixedLayoutContent>;

    fn parse_plain_text(&self, bytes: &[u8]) -> anyhow::Result<String> {
        let text = String::from_utf8_lossy(bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// EPUB through `epub` + `html2text`, PDF through `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinParser;

impl FormatParser for BuiltinParser {
    fn parse_reflowable(&self, bytes: &[u8]) -> anyhow::Result<ReflowContent> {
        epub_loader::load_epub(bytes)
    }

    fn parse_fixed_layout(&self, bytes: &[u8]) -> anyhow::Result<FixedLayoutContent> {
        pdf_loader::load_pdf(bytes)
    }
}

/// A document together with its parsed content.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: Document,
    pub content: BookContent,
}

/// Fetch metadata, classify, fetch content, parse.
///
/// Every failure here is a [`ReaderError::Load`]; nothing is partially
/// returned.
pub async fn load_document(
    source: &dyn ContentSource,
    parser: &dyn FormatParser,
    id: &DocumentId,
) -> Result<LoadedDocument> {
    let metadata = source.metadata(id).await.map_err(|err| {
        warn!(doc = %id, "Metadata fetch failed: {err:#}");
        ReaderError::load("fetch metadata", &err)
    })?;
    let family = FormatFamily::classify(&metadata.format);
    info!(doc = %id, format = %metadata.format, %family, "Loading document");

    let bytes = source.content(id).await.map_err(|err| {
        warn!(doc = %id, "Content fetch failed: {err:#}");
        ReaderError::load("fetch content", &err)
    })?;

    let content = match family {
        FormatFamily::Reflowable => parser
            .parse_reflowable(&bytes)
            .map(BookContent::Reflowable)
            .map_err(|err| ReaderError::load("parse reflowable content", &err))?,
        FormatFamily::FixedLayout => parser
            .parse_fixed_layout(&bytes)
            .map(BookContent::FixedLayout)
            .map_err(|err| ReaderError::load("parse fixed-layout content", &err))?,
        FormatFamily::PlainText => parser
            .parse_plain_text(&bytes)
            .map(BookContent::PlainText)
            .map_err(|err| ReaderError::load("decode plain text", &err))?,
    };

    Ok(LoadedDocument {
        document: Document {
            id: id.clone(),
            family,
            title: metadata.title,
        },
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryContentSource;

    #[test]
    fn relative_outline_paths_match_spine_hrefs() {
        let section = Section::new("OEBPS/Text/ch01.xhtml", "body");
        assert!(section.matches_path("Text/ch01.xhtml"));
        assert!(section.matches_path("ch01.xhtml"));
        assert!(section.matches_path("./ch01.xhtml"));
        assert!(!section.matches_path("h01.xhtml"));
        assert!(!section.matches_path(""));
    }

    #[test]
    fn anchor_offsets_are_clamped_to_text() {
        let section = Section::new("a.xhtml", "short").with_anchor("far", 99);
        assert_eq!(section.anchor_offset("far"), Some(5));
        assert_eq!(section.anchor_offset("near"), None);
    }

    #[test]
    fn plain_text_decoding_is_lossy() {
        let text = BuiltinParser
            .parse_plain_text(b"\xEF\xBB\xBFhello \xFF world")
            .unwrap();
        assert!(text.starts_with("hello"));
        assert!(text.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn content_failure_after_metadata_is_a_load_error() {
        let source = MemoryContentSource::new();
        source.insert("b1", "Broken", "TXT", None);
        let err = load_document(&source, &BuiltinParser, &"b1".into())
            .await
            .unwrap_err();
        assert!(err.is_blocking());
        assert!(err.to_string().contains("fetch content"));
    }

    #[tokio::test]
    async fn unparsable_pdf_is_a_load_error() {
        let source = MemoryContentSource::new();
        source.insert("p1", "Not a PDF", "PDF", Some(b"plain bytes".to_vec()));
        let err = load_document(&source, &BuiltinParser, &"p1".into())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "load");
    }

    #[tokio::test]
    async fn mobi_is_read_as_plain_text() {
        let source = MemoryContentSource::new();
        source.insert("m1", "Kindle", "MOBI", Some(b"some text".to_vec()));
        let loaded = load_document(&source, &BuiltinParser, &"m1".into())
            .await
            .unwrap();
        assert_eq!(loaded.document.family, FormatFamily::PlainText);
        assert!(matches!(loaded.content, BookContent::PlainText(ref t) if t == "some text"));
    }
}
