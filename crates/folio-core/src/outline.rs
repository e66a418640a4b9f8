//! Outline mapping: named jump targets resolved onto the progress scale.
//!
//! Fixed-layout entries resolve directly (`page / page_count`). Reflowable
//! entries go through an ordered list of [`Strategy`] values and stop at the
//! first one that succeeds. An entry no strategy can place keeps its target,
//! so it stays listed and navigable; it only loses its marker.

use crate::index::{LocationIndex, Locator, page_percentage};
use crate::loader::Section;
use crate::{ReaderError, Result};
use serde::Serialize;
use tracing::debug;
use ts_rs::TS;

/// Outline node as produced by a format parser.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineNode {
    pub label: String,
    pub target: OutlineTarget,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(label: impl Into<String>, target: OutlineTarget) -> Self {
        Self {
            label: label.into(),
            target,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineNode>) -> Self {
        self.children = children;
        self
    }
}

/// Where an outline node points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineTarget {
    /// Reflowable: `path/to/section.xhtml#anchor`.
    Href(String),
    /// Fixed-layout: 1-based page.
    Page(u32),
    /// The parser could not resolve a destination.
    Unresolved,
}

impl OutlineTarget {
    /// Raw jump target handed to the navigation controller.
    pub fn as_jump_target(&self) -> Option<String> {
        match self {
            OutlineTarget::Href(href) if !href.trim().is_empty() => Some(href.clone()),
            OutlineTarget::Href(_) => None,
            OutlineTarget::Page(page) => Some(page.to_string()),
            OutlineTarget::Unresolved => None,
        }
    }
}

/// Outline entry as exposed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct OutlineEntry {
    pub label: String,
    pub target: Option<String>,
    pub percentage: Option<f64>,
    pub children: Vec<OutlineEntry>,
}

/// A chapter marker on the unified progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Marker {
    pub label: String,
    pub target: Option<String>,
    pub percentage: f64,
}

/// Reflowable resolution strategies, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The entry's own anchor inside its section.
    ExplicitAnchor,
    /// The first addressable unit of the containing section.
    SectionStart,
    /// The section's ordinal among all spine sections.
    SpineOrdinal,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::ExplicitAnchor,
        Strategy::SectionStart,
        Strategy::SpineOrdinal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::ExplicitAnchor => "explicit_anchor",
            Strategy::SectionStart => "section_start",
            Strategy::SpineOrdinal => "spine_ordinal",
        }
    }

    fn resolve(self, ctx: &ReflowContext<'_>, href: &str) -> Result<f64> {
        let (path, fragment) = split_href(href);
        let section = ctx.section_for(path)?;
        match self {
            Strategy::ExplicitAnchor => {
                let fragment =
                    fragment.ok_or_else(|| ReaderError::Mapping("entry has no anchor".into()))?;
                let index = ctx.require_index()?;
                let offset = ctx.sections[section].anchor_offset(fragment).ok_or_else(|| {
                    ReaderError::Mapping(format!("anchor #{fragment} not found in {path}"))
                })?;
                index.percentage_of_locator(Locator::new(section, offset))
            }
            Strategy::SectionStart => {
                let index = ctx.require_index()?;
                let locator = index.first_in_section(section).ok_or_else(|| {
                    ReaderError::Mapping(format!("no addressable unit at or after {path}"))
                })?;
                index.percentage_of_locator(locator)
            }
            Strategy::SpineOrdinal => Ok(section as f64 / ctx.sections.len() as f64),
        }
    }
}

/// What reflowable resolution can look at.
pub struct ReflowContext<'a> {
    pub sections: &'a [Section],
    pub index: Option<&'a LocationIndex>,
}

impl ReflowContext<'_> {
    fn section_for(&self, path: &str) -> Result<usize> {
        if path.trim().is_empty() {
            return Err(ReaderError::Mapping("entry has no section path".into()));
        }
        self.sections
            .iter()
            .position(|section| section.matches_path(path))
            .ok_or_else(|| ReaderError::Mapping(format!("{path} is not in the spine")))
    }

    fn require_index(&self) -> Result<&LocationIndex> {
        self.index
            .ok_or_else(|| ReaderError::Mapping("location index not ready".into()))
    }

    /// Run the strategies in order and keep the first percentage.
    pub fn resolve(&self, href: &str) -> Result<f64> {
        let mut last_err = ReaderError::Mapping("no strategy applied".into());
        for strategy in Strategy::ORDER {
            match strategy.resolve(self, href) {
                Ok(pct) => {
                    debug!(%href, strategy = strategy.name(), pct, "Resolved outline entry");
                    return Ok(pct.clamp(0.0, 1.0));
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

/// Resolve a reflowable outline. Each entry is independent of its siblings.
pub fn map_reflowable(nodes: &[OutlineNode], ctx: &ReflowContext<'_>) -> Vec<OutlineEntry> {
    nodes
        .iter()
        .map(|node| {
            let percentage = match &node.target {
                OutlineTarget::Href(href) => contain(&node.label, ctx.resolve(href)),
                _ => contain(
                    &node.label,
                    Err(ReaderError::Mapping("no href target".into())),
                ),
            };
            OutlineEntry {
                label: node.label.clone(),
                target: node.target.as_jump_target(),
                percentage,
                children: map_reflowable(&node.children, ctx),
            }
        })
        .collect()
}

/// Resolve a fixed-layout outline against the page count.
pub fn map_fixed_layout(nodes: &[OutlineNode], page_count: u32) -> Vec<OutlineEntry> {
    nodes
        .iter()
        .map(|node| {
            let resolved = match node.target {
                OutlineTarget::Page(page) => page_percentage(page, page_count).ok_or_else(|| {
                    ReaderError::Mapping(format!("page {page} outside 1..={page_count}"))
                }),
                _ => Err(ReaderError::Mapping("destination did not resolve".into())),
            };
            OutlineEntry {
                label: node.label.clone(),
                target: node.target.as_jump_target(),
                percentage: contain(&node.label, resolved),
                children: map_fixed_layout(&node.children, page_count),
            }
        })
        .collect()
}

/// Entries without a target or percentage keep only their label.
pub fn map_unresolved(nodes: &[OutlineNode]) -> Vec<OutlineEntry> {
    nodes
        .iter()
        .map(|node| OutlineEntry {
            label: node.label.clone(),
            target: node.target.as_jump_target(),
            percentage: None,
            children: map_unresolved(&node.children),
        })
        .collect()
}

fn contain(label: &str, resolved: Result<f64>) -> Option<f64> {
    match resolved {
        Ok(pct) => Some(pct),
        Err(err) => {
            debug!(%label, "Outline entry has no marker: {err}");
            None
        }
    }
}

/// Markers for every resolved entry, depth-first, sorted by percentage.
pub fn markers(entries: &[OutlineEntry]) -> Vec<Marker> {
    let mut out = Vec::new();
    collect_markers(entries, &mut out);
    out.sort_by(|a, b| a.percentage.total_cmp(&b.percentage));
    out
}

fn collect_markers(entries: &[OutlineEntry], out: &mut Vec<Marker>) {
    for entry in entries {
        if let Some(percentage) = entry.percentage {
            out.push(Marker {
                label: entry.label.clone(),
                target: entry.target.clone(),
                percentage,
            });
        }
        collect_markers(&entry.children, out);
    }
}

/// The entry with the largest percentage not past `percentage`. Deeper
/// entries win ties.
pub fn containing_entry(entries: &[OutlineEntry], percentage: f64) -> Option<&OutlineEntry> {
    let mut best: Option<&OutlineEntry> = None;
    visit(entries, &mut |entry| {
        let Some(pct) = entry.percentage else {
            return;
        };
        if pct > percentage + f64::EPSILON {
            return;
        }
        if best.and_then(|b| b.percentage).is_none_or(|b| pct >= b) {
            best = Some(entry);
        }
    });
    best
}

fn visit<'a>(entries: &'a [OutlineEntry], f: &mut impl FnMut(&'a OutlineEntry)) {
    for entry in entries {
        f(entry);
        visit(&entry.children, f);
    }
}

/// Count entries in the tree, resolved or not.
pub fn entry_count(entries: &[OutlineEntry]) -> usize {
    entries
        .iter()
        .map(|entry| 1 + entry_count(&entry.children))
        .sum()
}

fn split_href(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) if !fragment.is_empty() => (path, Some(fragment)),
        Some((path, _)) => (path, None),
        None => (href, None),
    }
}
