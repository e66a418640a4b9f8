//! EPUB loading utilities.
//!
//! Opens an EPUB from memory, walks its spine, strips markup per section and
//! keeps the table of contents. Anchor offsets are computed only for the
//! fragment ids the table of contents actually points at.

use crate::loader::{ReflowContent, Section};
use crate::outline::{OutlineNode, OutlineTarget};
use anyhow::{Context, Result, bail};
use epub::doc::{EpubDoc, NavPoint};
use regex::Regex;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info, warn};

// Large enough that html2text never bakes in hard line breaks.
const TEXT_WIDTH: usize = 10_000;
const ANCHOR_MARK: &str = "\u{e000}folio-anchor\u{e000}";

/// Parse an EPUB payload into spine sections plus its table of contents.
pub fn load_epub(bytes: &[u8]) -> Result<ReflowContent> {
    let mut doc =
        EpubDoc::from_reader(Cursor::new(bytes.to_vec())).context("Failed to open EPUB")?;

    let toc: Vec<OutlineNode> = doc.toc.iter().map(nav_to_node).collect();
    let wanted = fragments_by_path(&toc);

    let mut sections = Vec::new();
    loop {
        let href = doc
            .get_current_path()
            .map(|path| path.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        match doc.get_current_str() {
            Some((chapter, _mime)) => {
                let mut section = Section::new(href, html_to_text(&chapter, sections.len()));
                for (path, ids) in &wanted {
                    if !section.matches_path(path) {
                        continue;
                    }
                    for id in ids {
                        if let Some(offset) = anchor_offset(&chapter, id, section.text.len()) {
                            section.anchors.push((id.clone(), offset));
                        }
                    }
                }
                debug!(
                    section = sections.len(),
                    href = %section.href,
                    chars = section.text.len(),
                    anchors = section.anchors.len(),
                    "Parsed section"
                );
                sections.push(section);
            }
            None => {
                // Keep spine ordinals aligned even when an item is unreadable.
                warn!(section = sections.len(), %href, "Spine item has no readable content");
                sections.push(Section::new(href, String::new()));
            }
        }

        if !doc.go_next() {
            break;
        }
    }

    if sections.iter().all(|section| section.text.trim().is_empty()) {
        bail!("EPUB has no textual content");
    }

    info!(
        sections = sections.len(),
        toc_entries = toc.len(),
        "Finished loading EPUB content"
    );
    Ok(ReflowContent { sections, toc })
}

fn nav_to_node(point: &NavPoint) -> OutlineNode {
    let href = point.content.to_string_lossy().replace('\\', "/");
    let target = if href.trim().is_empty() {
        OutlineTarget::Unresolved
    } else {
        OutlineTarget::Href(href)
    };
    OutlineNode::new(point.label.trim(), target)
        .with_children(point.children.iter().map(nav_to_node).collect())
}

fn fragments_by_path(nodes: &[OutlineNode]) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    collect_fragments(nodes, &mut out);
    out
}

fn collect_fragments(nodes: &[OutlineNode], out: &mut HashMap<String, Vec<String>>) {
    for node in nodes {
        if let OutlineTarget::Href(href) = &node.target
            && let Some((path, fragment)) = href.split_once('#')
            && !fragment.is_empty()
        {
            out.entry(path.to_string())
                .or_default()
                .push(fragment.to_string());
        }
        collect_fragments(&node.children, out);
    }
}

fn html_to_text(chapter: &str, section: usize) -> String {
    match html2text::from_read(chapter.as_bytes(), TEXT_WIDTH) {
        Ok(clean) => clean,
        Err(err) => {
            warn!(section, "html2text failed: {err}");
            chapter.to_string()
        }
    }
}

/// Text offset of the element carrying `id`.
///
/// A marker is spliced in as the element's first content and the whole
/// chapter is converted again; everything before the marker renders exactly
/// as in the section text, link footnotes included.
fn anchor_offset(html: &str, id: &str, text_len: usize) -> Option<usize> {
    let pattern = format!(r#"\s(?:id|name)\s*=\s*["']{}["']"#, regex::escape(id));
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(html)?;
    let tag_start = html[..found.start()].rfind('<')?;
    if html[tag_start..found.start()].contains('>') {
        return None;
    }
    let tag_end = found.end() + html[found.end()..].find('>')? + 1;

    let marked = format!("{}{ANCHOR_MARK}{}", &html[..tag_end], &html[tag_end..]);
    let text = html2text::from_read(marked.as_bytes(), TEXT_WIDTH).ok()?;
    let offset = text.find(ANCHOR_MARK)?;
    Some(offset.min(text_len))
}
