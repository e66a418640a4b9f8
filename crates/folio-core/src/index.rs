//! Position index: the percentage-addressable view of a document.
//!
//! Reflowable documents are cut into roughly equal locations by an
//! asynchronous build; until that build lands, anything that needs a
//! percentage is deferred. Fixed-layout documents are indexed by their page
//! count. Plain text has no sub-document index at all.
//!
//! Reflowable identifiers look like `epubcfi(/6/4!/4:1380)`: the spine step
//! (`(section + 1) * 2`) followed by a byte offset into the section text.

use crate::cancellation::CancellationToken;
use crate::config::PlainTextProgress;
use crate::loader::Section;
use crate::pagination::location_starts;
use crate::{ReaderError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

static LOCATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^epubcfi\(/6/(\d+)!/4:(\d+)\)$").expect("locator pattern is valid")
});

/// A position inside reflowable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locator {
    pub section: usize,
    pub offset: usize,
}

impl Locator {
    pub fn new(section: usize, offset: usize) -> Self {
        Self { section, offset }
    }

    pub fn to_identifier(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epubcfi(/6/{}!/4:{})", (self.section + 1) * 2, self.offset)
    }
}

impl FromStr for Locator {
    type Err = ReaderError;

    fn from_str(identifier: &str) -> Result<Self> {
        let caps = LOCATOR_RE
            .captures(identifier.trim())
            .ok_or_else(|| ReaderError::Mapping(format!("malformed identifier {identifier:?}")))?;
        let step: usize = caps[1]
            .parse()
            .map_err(|_| ReaderError::Mapping(format!("spine step overflow in {identifier:?}")))?;
        let offset: usize = caps[2]
            .parse()
            .map_err(|_| ReaderError::Mapping(format!("offset overflow in {identifier:?}")))?;
        if step < 2 || step % 2 != 0 {
            return Err(ReaderError::Mapping(format!(
                "spine step {step} is not an even element step"
            )));
        }
        Ok(Locator {
            section: step / 2 - 1,
            offset,
        })
    }
}

/// Ordered table of N approximately-equal addressable locations.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationIndex {
    locations: Vec<Locator>,
    section_lengths: Vec<usize>,
}

impl LocationIndex {
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn locations(&self) -> &[Locator] {
        &self.locations
    }

    /// Ordinal of the location containing `locator`.
    pub fn ordinal_of(&self, locator: Locator) -> Result<usize> {
        let Some(&section_len) = self.section_lengths.get(locator.section) else {
            return Err(ReaderError::Mapping(format!(
                "section {} is outside the spine ({} sections)",
                locator.section,
                self.section_lengths.len()
            )));
        };
        if locator.offset > section_len {
            return Err(ReaderError::Mapping(format!(
                "offset {} is past the end of section {} ({section_len} bytes)",
                locator.offset, locator.section
            )));
        }
        if self.locations.is_empty() {
            return Err(ReaderError::Mapping("index has no locations".into()));
        }
        Ok(self
            .locations
            .partition_point(|loc| *loc <= locator)
            .saturating_sub(1))
    }

    /// `ordinal / N`, always inside `[0, 1)`.
    pub fn percentage_of_locator(&self, locator: Locator) -> Result<f64> {
        let ordinal = self.ordinal_of(locator)?;
        Ok(ordinal as f64 / self.locations.len() as f64)
    }

    /// Percentage for an identifier. Malformed identifiers are mapping errors.
    pub fn percentage_of(&self, identifier: &str) -> Result<f64> {
        let locator: Locator = identifier.parse()?;
        self.percentage_of_locator(locator)
    }

    /// Nearest location at or before `percentage`.
    pub fn locator_at(&self, percentage: f64) -> Option<Locator> {
        if self.locations.is_empty() || !percentage.is_finite() {
            return None;
        }
        let n = self.locations.len();
        let ordinal = ((percentage.clamp(0.0, 1.0) * n as f64).floor() as usize).min(n - 1);
        self.locations.get(ordinal).copied()
    }

    pub fn identifier_at(&self, percentage: f64) -> Option<String> {
        self.locator_at(percentage).map(Locator::to_identifier)
    }

    /// First location at or after the start of `section`.
    ///
    /// Sections without text of their own advance to the next section that has
    /// an addressable unit.
    pub fn first_in_section(&self, section: usize) -> Option<Locator> {
        if section >= self.section_lengths.len() {
            return None;
        }
        let start = Locator::new(section, 0);
        let idx = self.locations.partition_point(|loc| *loc < start);
        self.locations.get(idx).copied()
    }
}

/// Build the location table for `sections`.
///
/// Yields to the scheduler after every section and stops as soon as the
/// owning session is torn down.
pub async fn build_location_index(
    sections: Arc<[Section]>,
    chars_per_location: usize,
    liveness: CancellationToken,
) -> Result<LocationIndex> {
    let mut locations = Vec::new();
    let mut section_lengths = Vec::with_capacity(sections.len());

    for (idx, section) in sections.iter().enumerate() {
        liveness.check_cancelled("index_build")?;
        let starts = location_starts(&section.text, chars_per_location);
        debug!(
            section = idx,
            href = %section.href,
            locations = starts.len(),
            "Indexed section"
        );
        locations.extend(starts.into_iter().map(|offset| Locator::new(idx, offset)));
        section_lengths.push(section.text.len());
        tokio::task::yield_now().await;
    }
    liveness.check_cancelled("index_build")?;

    if locations.is_empty() {
        return Err(ReaderError::IndexBuild(
            "document has no addressable text".into(),
        ));
    }
    info!(
        sections = sections.len(),
        locations = locations.len(),
        "Location index ready"
    );
    Ok(LocationIndex {
        locations,
        section_lengths,
    })
}

/// Progress of the reflowable index build.
#[derive(Debug, Clone)]
pub enum IndexState {
    Building,
    Ready(Arc<LocationIndex>),
    Failed(String),
}

/// Format-specific position index of a session.
#[derive(Debug, Clone)]
pub enum PositionIndex {
    Reflowable(IndexState),
    FixedLayout { page_count: u32 },
    PlainText(PlainTextProgress),
}

impl PositionIndex {
    /// Whether percentages derived from this index may be persisted.
    pub fn is_ready(&self) -> bool {
        match self {
            PositionIndex::Reflowable(IndexState::Ready(_)) => true,
            PositionIndex::Reflowable(_) => false,
            PositionIndex::FixedLayout { page_count } => *page_count > 0,
            PositionIndex::PlainText(mode) => *mode == PlainTextProgress::WholeDocument,
        }
    }

    pub fn is_building(&self) -> bool {
        matches!(self, PositionIndex::Reflowable(IndexState::Building))
    }

    pub fn location_index(&self) -> Option<&Arc<LocationIndex>> {
        match self {
            PositionIndex::Reflowable(IndexState::Ready(index)) => Some(index),
            _ => None,
        }
    }

    /// Best-effort percentage for an identifier; `None` when the index cannot
    /// answer yet or the identifier does not map.
    pub fn percentage_for(&self, identifier: &str) -> Option<f64> {
        match self {
            PositionIndex::Reflowable(IndexState::Ready(index)) => {
                match index.percentage_of(identifier) {
                    Ok(pct) => Some(pct),
                    Err(err) => {
                        debug!(%identifier, "Skipping percentage: {err}");
                        None
                    }
                }
            }
            PositionIndex::Reflowable(_) => None,
            PositionIndex::FixedLayout { page_count } => {
                let page: u32 = identifier.trim().parse().ok()?;
                page_percentage(page, *page_count)
            }
            PositionIndex::PlainText(PlainTextProgress::WholeDocument) => Some(0.0),
            PositionIndex::PlainText(PlainTextProgress::Off) => None,
        }
    }
}

/// `page / page_count` for an in-range 1-based page.
pub fn page_percentage(page: u32, page_count: u32) -> Option<f64> {
    if page == 0 || page > page_count {
        return None;
    }
    Some(f64::from(page) / f64::from(page_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections(texts: &[&str]) -> Arc<[Section]> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| Section::new(format!("ch{idx}.xhtml"), *text))
            .collect::<Vec<_>>()
            .into()
    }

    fn words(count: usize) -> String {
        (0..count)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn locator_identifier_round_trips() {
        let loc = Locator::new(3, 1380);
        assert_eq!(loc.to_identifier(), "epubcfi(/6/8!/4:1380)");
        assert_eq!(loc.to_identifier().parse::<Locator>().unwrap(), loc);
    }

    #[test]
    fn malformed_identifiers_fail_safely() {
        for bad in ["", "chapter1", "epubcfi(/6/3!/4:0)", "epubcfi(/6/0!/4:0)", "60"] {
            let err = bad.parse::<Locator>().unwrap_err();
            assert_eq!(err.category(), "mapping", "{bad}");
        }
    }

    #[tokio::test]
    async fn percentage_round_trip_is_within_one_location() {
        let text = words(2_000);
        let index = build_location_index(
            sections(&[&text, &text, &text]),
            200,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let n = index.len() as f64;
        assert!(index.len() > 10);

        for step in 0..=100 {
            let p = f64::from(step) / 100.0;
            let id = index.identifier_at(p).unwrap();
            let back = index.percentage_of(&id).unwrap();
            assert!((p - back).abs() <= 1.0 / n + 1e-12, "p={p} back={back}");
            assert!((0.0..=1.0).contains(&back));
        }
    }

    #[tokio::test]
    async fn first_location_is_zero_percent() {
        let index = build_location_index(sections(&["alpha beta"]), 200, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(index.percentage_of("epubcfi(/6/2!/4:0)").unwrap(), 0.0);
    }

    #[tokio::test]
    async fn out_of_range_identifiers_are_mapping_errors() {
        let index = build_location_index(sections(&["alpha beta"]), 200, CancellationToken::new())
            .await
            .unwrap();
        assert!(index.percentage_of("epubcfi(/6/20!/4:0)").is_err());
        assert!(index.percentage_of("epubcfi(/6/2!/4:9999)").is_err());
    }

    #[tokio::test]
    async fn empty_sections_advance_to_next_unit() {
        let index = build_location_index(
            sections(&["alpha beta", "", "gamma delta"]),
            200,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(index.first_in_section(1), Some(Locator::new(2, 0)));
        assert_eq!(index.first_in_section(7), None);
    }

    #[tokio::test]
    async fn cancelled_build_stops() {
        let token = CancellationToken::new();
        token.cancel();
        let err = build_location_index(sections(&["alpha"]), 200, token)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cancelled");
    }

    #[tokio::test]
    async fn blank_document_fails_index_build() {
        let err = build_location_index(sections(&["", "  "]), 200, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "index_build");
    }

    #[test]
    fn fixed_layout_percentage_is_page_over_count() {
        let index = PositionIndex::FixedLayout { page_count: 120 };
        assert_eq!(index.percentage_for("60"), Some(0.5));
        assert_eq!(index.percentage_for("120"), Some(1.0));
        assert_eq!(index.percentage_for("0"), None);
        assert_eq!(index.percentage_for("121"), None);
        assert_eq!(index.percentage_for("sixty"), None);
    }

    #[test]
    fn plain_text_percentage_follows_mode() {
        assert_eq!(
            PositionIndex::PlainText(PlainTextProgress::Off).percentage_for("0"),
            None
        );
        assert_eq!(
            PositionIndex::PlainText(PlainTextProgress::WholeDocument).percentage_for("0"),
            Some(0.0)
        );
        assert!(!PositionIndex::PlainText(PlainTextProgress::Off).is_ready());
    }

    #[test]
    fn building_index_defers_percentages() {
        let index = PositionIndex::Reflowable(IndexState::Building);
        assert!(!index.is_ready());
        assert!(index.is_building());
        assert_eq!(index.percentage_for("epubcfi(/6/2!/4:0)"), None);
    }
}
