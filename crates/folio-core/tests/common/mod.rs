#![allow(dead_code)]

use anyhow::anyhow;
use folio_core::loader::{FixedLayoutContent, FormatParser, ReflowContent, Section};
use folio_core::outline::{OutlineNode, OutlineTarget};
use folio_core::source::MemoryContentSource;
use folio_core::store::{MemoryBookmarkStore, MemoryProgressStore};
use folio_core::{Collaborators, DocumentId, ReaderConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hands out prebuilt content keyed by the payload bytes.
#[derive(Default)]
pub struct StubParser {
    reflow: Mutex<HashMap<Vec<u8>, ReflowContent>>,
    fixed: Mutex<HashMap<Vec<u8>, FixedLayoutContent>>,
}

impl FormatParser for StubParser {
    fn parse_reflowable(&self, bytes: &[u8]) -> anyhow::Result<ReflowContent> {
        self.reflow
            .lock()
            .unwrap()
            .get(bytes)
            .cloned()
            .ok_or_else(|| anyhow!("unknown reflowable payload"))
    }

    fn parse_fixed_layout(&self, bytes: &[u8]) -> anyhow::Result<FixedLayoutContent> {
        self.fixed
            .lock()
            .unwrap()
            .get(bytes)
            .cloned()
            .ok_or_else(|| anyhow!("unknown fixed-layout payload"))
    }
}

pub struct Harness {
    pub source: Arc<MemoryContentSource>,
    pub parser: Arc<StubParser>,
    pub progress: Arc<MemoryProgressStore>,
    pub bookmarks: Arc<MemoryBookmarkStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            source: Arc::new(MemoryContentSource::new()),
            parser: Arc::new(StubParser::default()),
            progress: Arc::new(MemoryProgressStore::new()),
            bookmarks: Arc::new(MemoryBookmarkStore::new()),
        }
    }

    pub fn add_reflowable(&self, id: &str, content: ReflowContent) -> DocumentId {
        let payload = format!("epub:{id}").into_bytes();
        self.source.insert(id, id, "EPUB", Some(payload.clone()));
        self.parser.reflow.lock().unwrap().insert(payload, content);
        DocumentId::new(id)
    }

    pub fn add_fixed(&self, id: &str, page_count: u32, outline: Vec<OutlineNode>) -> DocumentId {
        let payload = format!("pdf:{id}").into_bytes();
        self.source.insert(id, id, "PDF", Some(payload.clone()));
        self.parser
            .fixed
            .lock()
            .unwrap()
            .insert(payload, FixedLayoutContent::new(page_count, outline));
        DocumentId::new(id)
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            content: self.source.clone(),
            parser: self.parser.clone(),
            progress: self.progress.clone(),
            bookmarks: self.bookmarks.clone(),
        }
    }
}

pub fn config() -> ReaderConfig {
    ReaderConfig {
        chars_per_location: 128,
        font_size: 16,
        lines_per_screen: 8,
        ..ReaderConfig::default()
    }
}

/// `sections` chapters of ten paragraphs each. Every chapter has an outline
/// entry plus a child pointing at an anchor halfway through it.
pub fn book(sections: usize) -> ReflowContent {
    let mut spine = Vec::new();
    let mut toc = Vec::new();
    for n in 1..=sections {
        let text = (0..10)
            .map(|p| {
                (0..40)
                    .map(|w| format!("c{n}p{p}w{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let mid = text.len() / 2;
        spine.push(Section::new(format!("OEBPS/ch{n}.xhtml"), text).with_anchor("mid", mid));
        toc.push(
            OutlineNode::new(format!("Chapter {n}"), OutlineTarget::Href(format!("ch{n}.xhtml")))
                .with_children(vec![OutlineNode::new(
                    format!("Chapter {n}, part two"),
                    OutlineTarget::Href(format!("ch{n}.xhtml#mid")),
                )]),
        );
    }
    ReflowContent {
        sections: spine,
        toc,
    }
}

/// `count` chapters spread evenly over `page_count` pages.
pub fn page_outline(count: u32, page_count: u32) -> Vec<OutlineNode> {
    (0..count)
        .map(|n| {
            OutlineNode::new(
                format!("Chapter {}", n + 1),
                OutlineTarget::Page(1 + n * page_count / count),
            )
        })
        .collect()
}
