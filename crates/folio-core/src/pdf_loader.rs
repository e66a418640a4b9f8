//! PDF loading: page count up front, outline on demand.
//!
//! Outline items point at pages either directly (`[page-ref /Fit]`), through a
//! `GoTo` action, or by name. Names are looked up in the catalog `Dests`
//! dictionary and in the `Names/Dests` name tree, which may nest through
//! `Kids` and may chain to other named destinations.

use crate::loader::{FixedLayoutContent, OutlineWalk};
use crate::outline::{OutlineNode, OutlineTarget};
use anyhow::{Context, Result, bail};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_OUTLINE_DEPTH: usize = 32;
const MAX_DEST_DEPTH: usize = 8;
const MAX_NAME_TREE_DEPTH: usize = 16;
const MAX_REFERENCE_CHAIN: usize = 8;

/// Parse a PDF payload for its page count. The outline is walked later
/// through [`OutlineWalk::resolve`], off the scheduler thread.
pub fn load_pdf(bytes: &[u8]) -> Result<FixedLayoutContent> {
    let doc = Document::load_mem(bytes).context("Failed to parse PDF")?;
    let page_count =
        u32::try_from(doc.get_pages().len()).context("PDF page count does not fit in u32")?;
    if page_count == 0 {
        bail!("PDF has no pages");
    }
    info!(page_count, "Loaded PDF");
    Ok(FixedLayoutContent {
        page_count,
        outline: OutlineWalk::Pdf(Arc::from(bytes)),
    })
}

/// Parse `bytes` and walk the outline.
pub fn read_outline_from(bytes: &[u8]) -> Result<Vec<OutlineNode>> {
    let doc = Document::load_mem(bytes).context("Failed to parse PDF")?;
    read_outline(&doc)
}

/// Walk the document outline. Items whose destination cannot be resolved are
/// kept with [`OutlineTarget::Unresolved`].
pub fn read_outline(doc: &Document) -> Result<Vec<OutlineNode>> {
    let root = doc
        .trailer
        .get(b"Root")
        .context("PDF trailer has no Root")?;
    let catalog = resolve(doc, root)
        .and_then(Object::as_dict)
        .context("PDF catalog is not a dictionary")?;

    let Some(first) = catalog
        .get(b"Outlines")
        .ok()
        .and_then(|outlines| resolve(doc, outlines).ok())
        .and_then(|outlines| outlines.as_dict().ok())
        .and_then(|outlines| outlines.get(b"First").ok())
    else {
        debug!("PDF has no outline");
        return Ok(Vec::new());
    };

    let mut walker = OutlineWalker {
        doc,
        pages: doc
            .get_pages()
            .into_iter()
            .map(|(number, id)| (id, number))
            .collect(),
        catalog,
        visited: HashSet::new(),
    };
    let nodes = walker.siblings(first, 0);
    info!(entries = nodes.len(), "Read PDF outline");
    Ok(nodes)
}

/// Follow indirect references. A chain longer than the limit is returned
/// unresolved and fails at the caller's type check.
fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> lopdf::Result<&'a Object> {
    for _ in 0..MAX_REFERENCE_CHAIN {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id)?,
            other => return Ok(other),
        }
    }
    Ok(obj)
}

struct OutlineWalker<'a> {
    doc: &'a Document,
    pages: HashMap<ObjectId, u32>,
    catalog: &'a Dictionary,
    visited: HashSet<ObjectId>,
}

impl<'a> OutlineWalker<'a> {
    fn resolve(&self, obj: &'a Object) -> lopdf::Result<&'a Object> {
        resolve(self.doc, obj)
    }

    fn siblings(&mut self, first: &'a Object, depth: usize) -> Vec<OutlineNode> {
        let mut nodes = Vec::new();
        let mut cursor = Some(first);

        while let Some(item_ref) = cursor.take() {
            if let Object::Reference(id) = item_ref
                && !self.visited.insert(*id)
            {
                warn!(?id, "Outline item visited twice; stopping this branch");
                break;
            }
            let Ok(item) = self.resolve(item_ref).and_then(Object::as_dict) else {
                warn!("Outline item is not a dictionary");
                break;
            };

            let label = item
                .get(b"Title")
                .ok()
                .and_then(|title| self.resolve(title).ok())
                .and_then(decode_text_string)
                .unwrap_or_default();
            let target = match self.destination_of(item) {
                Some(page) => OutlineTarget::Page(page),
                None => {
                    debug!(%label, "Outline destination did not resolve");
                    OutlineTarget::Unresolved
                }
            };
            let children = match item.get(b"First") {
                Ok(child) if depth < MAX_OUTLINE_DEPTH => self.siblings(child, depth + 1),
                _ => Vec::new(),
            };

            nodes.push(OutlineNode::new(label, target).with_children(children));
            cursor = item.get(b"Next").ok();
        }

        nodes
    }

    fn destination_of(&self, item: &'a Dictionary) -> Option<u32> {
        if let Ok(dest) = item.get(b"Dest") {
            return self.resolve_dest(dest, 0);
        }
        let action = self.resolve(item.get(b"A").ok()?).ok()?.as_dict().ok()?;
        let is_goto = action
            .get(b"S")
            .ok()
            .and_then(|kind| kind.as_name().ok())
            == Some(b"GoTo".as_slice());
        if !is_goto {
            return None;
        }
        self.resolve_dest(action.get(b"D").ok()?, 0)
    }

    fn resolve_dest(&self, dest: &'a Object, depth: usize) -> Option<u32> {
        if depth > MAX_DEST_DEPTH {
            return None;
        }
        match self.resolve(dest).ok()? {
            Object::Array(items) => match items.first()? {
                Object::Reference(page_id) => self.pages.get(page_id).copied(),
                Object::Integer(index) => {
                    let page = u32::try_from(*index).ok()?.checked_add(1)?;
                    (page as usize <= self.pages.len()).then_some(page)
                }
                _ => None,
            },
            Object::Dictionary(dict) => self.resolve_dest(dict.get(b"D").ok()?, depth + 1),
            Object::Name(name) | Object::String(name, _) => self.named_dest(name, depth),
            _ => None,
        }
    }

    fn named_dest(&self, name: &[u8], depth: usize) -> Option<u32> {
        if let Some(dests) = self
            .catalog
            .get(b"Dests")
            .ok()
            .and_then(|dests| self.resolve(dests).ok())
            .and_then(|dests| dests.as_dict().ok())
            && let Ok(dest) = dests.get(name)
        {
            return self.resolve_dest(dest, depth + 1);
        }

        let names = self
            .resolve(self.catalog.get(b"Names").ok()?)
            .ok()?
            .as_dict()
            .ok()?;
        let tree = names.get(b"Dests").ok()?;
        let dest = self.lookup_name_tree(tree, name, 0)?;
        self.resolve_dest(dest, depth + 1)
    }

    fn lookup_name_tree(&self, node: &'a Object, name: &[u8], depth: usize) -> Option<&'a Object> {
        if depth > MAX_NAME_TREE_DEPTH {
            return None;
        }
        let node = self.resolve(node).ok()?.as_dict().ok()?;

        if let Ok(pairs) = node
            .get(b"Names")
            .and_then(|names| self.resolve(names))
            .and_then(Object::as_array)
        {
            for pair in pairs.chunks(2) {
                if let [key, value] = pair
                    && matches!(self.resolve(key), Ok(Object::String(key, _)) if key.as_slice() == name)
                {
                    return Some(value);
                }
            }
        }

        if let Ok(kids) = node
            .get(b"Kids")
            .and_then(|kids| self.resolve(kids))
            .and_then(Object::as_array)
        {
            for kid in kids {
                if let Some(found) = self.lookup_name_tree(kid, name, depth + 1) {
                    return Some(found);
                }
            }
        }

        None
    }
}

/// PDF text strings are UTF-16BE with a byte-order mark, or single-byte
/// PDFDocEncoding (read here as Latin-1).
fn decode_text_string(obj: &Object) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };
    let text = if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| char::from(b)).collect()
    };
    Some(text.trim().to_string())
}
