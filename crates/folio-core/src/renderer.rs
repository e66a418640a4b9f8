//! Renderers: turn jump targets into visible positions.
//!
//! A renderer never reports its position through a return value. Every
//! successful `display`, `next` or `prev` emits exactly one
//! [`Relocation`] on the session channel, even when the position did not
//! change, so the session can always await a settle.

use crate::document::FormatFamily;
use crate::events::{EventSender, Relocation};
use crate::index::Locator;
use crate::loader::Section;
use crate::pagination::{chars_per_screen, screen_starts};
use crate::{ReaderError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A navigation request in the vocabulary of one format family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Beginning of the document.
    Start,
    /// Reflowable locator such as `epubcfi(/6/4!/4:120)`.
    Locator(Locator),
    /// Reflowable section path with optional `#anchor`.
    Href(String),
    /// Fixed-layout 1-based page.
    Page(u32),
}

impl Target {
    /// Interpret a raw jump target for `family`. Anything the family cannot
    /// address is a relocation error.
    pub fn parse_for(family: FormatFamily, raw: &str) -> Result<Target> {
        let raw = raw.trim();
        match family {
            FormatFamily::FixedLayout => raw
                .parse::<u32>()
                .ok()
                .filter(|page| *page > 0)
                .map(Target::Page)
                .ok_or_else(|| ReaderError::Relocation(format!("{raw:?} is not a page number"))),
            FormatFamily::Reflowable if raw.starts_with("epubcfi(") => raw
                .parse::<Locator>()
                .map(Target::Locator)
                .map_err(|err| ReaderError::Relocation(err.to_string())),
            FormatFamily::Reflowable if raw.is_empty() => {
                Err(ReaderError::Relocation("empty jump target".into()))
            }
            FormatFamily::Reflowable => Ok(Target::Href(raw.to_string())),
            FormatFamily::PlainText if raw.is_empty() || raw == "0" => Ok(Target::Start),
            FormatFamily::PlainText => Err(ReaderError::Relocation(format!(
                "plain text has no position {raw:?}"
            ))),
        }
    }
}

/// Display surface for one open document.
#[async_trait]
pub trait Renderer: Send {
    async fn display(&mut self, target: &Target) -> Result<()>;
    async fn next(&mut self) -> Result<()>;
    async fn prev(&mut self) -> Result<()>;

    /// Re-lay out for a new font size. Returns whether a relocation was
    /// emitted.
    async fn set_font_size(&mut self, _font_size: u32) -> Result<bool> {
        Ok(false)
    }
}

/// Screen-by-screen renderer for reflowable sections.
pub struct ReflowRenderer {
    sections: Arc<[Section]>,
    screens: Vec<Vec<usize>>,
    lines_per_screen: usize,
    current: Option<(usize, usize)>,
    events: EventSender,
}

impl ReflowRenderer {
    pub fn new(
        sections: Arc<[Section]>,
        font_size: u32,
        lines_per_screen: usize,
        events: EventSender,
    ) -> Self {
        let screens = layout(&sections, font_size, lines_per_screen);
        Self {
            sections,
            screens,
            lines_per_screen,
            current: None,
            events,
        }
    }

    fn screen_containing(&self, section: usize, offset: usize) -> Result<usize> {
        let Some(text) = self.sections.get(section).map(|s| &s.text) else {
            return Err(ReaderError::Relocation(format!(
                "section {section} is outside the spine"
            )));
        };
        if offset > text.len() {
            return Err(ReaderError::Relocation(format!(
                "offset {offset} is past the end of section {section}"
            )));
        }
        let starts = &self.screens[section];
        Ok(starts.partition_point(|start| *start <= offset).saturating_sub(1))
    }

    fn resolve_href(&self, href: &str) -> Result<(usize, usize)> {
        let (path, fragment) = href.split_once('#').unwrap_or((href, ""));
        let section = self
            .sections
            .iter()
            .position(|section| section.matches_path(path))
            .ok_or_else(|| ReaderError::Relocation(format!("{path} is not in the spine")))?;
        let offset = if fragment.is_empty() {
            0
        } else {
            self.sections[section]
                .anchor_offset(fragment)
                .unwrap_or_else(|| {
                    debug!(%href, "Unknown anchor; showing section start");
                    0
                })
        };
        Ok((section, self.screen_containing(section, offset)?))
    }

    fn go(&mut self, section: usize, screen: usize) -> Result<()> {
        self.current = Some((section, screen));
        let offset = self.screens[section][screen];
        let at_end =
            section + 1 == self.sections.len() && screen + 1 == self.screens[section].len();
        self.events.relocated(Relocation {
            identifier: Locator::new(section, offset).to_identifier(),
            section: Some(self.sections[section].href.clone()),
            page: None,
            at_end,
        })
    }

    fn position(&self) -> Result<(usize, usize)> {
        self.current
            .ok_or_else(|| ReaderError::Relocation("nothing displayed yet".into()))
    }
}

#[async_trait]
impl Renderer for ReflowRenderer {
    async fn display(&mut self, target: &Target) -> Result<()> {
        if self.sections.is_empty() {
            return Err(ReaderError::Relocation("document has no sections".into()));
        }
        let (section, screen) = match target {
            Target::Start => (0, 0),
            Target::Locator(locator) => (
                locator.section,
                self.screen_containing(locator.section, locator.offset)?,
            ),
            Target::Href(href) => self.resolve_href(href)?,
            Target::Page(page) => {
                return Err(ReaderError::Relocation(format!(
                    "page {page} is not addressable in reflowable content"
                )));
            }
        };
        self.go(section, screen)
    }

    async fn next(&mut self) -> Result<()> {
        let (section, screen) = self.position()?;
        if screen + 1 < self.screens[section].len() {
            self.go(section, screen + 1)
        } else if section + 1 < self.sections.len() {
            self.go(section + 1, 0)
        } else {
            self.go(section, screen)
        }
    }

    async fn prev(&mut self) -> Result<()> {
        let (section, screen) = self.position()?;
        if screen > 0 {
            self.go(section, screen - 1)
        } else if section > 0 {
            let last = self.screens[section - 1].len() - 1;
            self.go(section - 1, last)
        } else {
            self.go(section, screen)
        }
    }

    async fn set_font_size(&mut self, font_size: u32) -> Result<bool> {
        let anchor = self
            .current
            .map(|(section, screen)| (section, self.screens[section][screen]));
        self.screens = layout(&self.sections, font_size, self.lines_per_screen);
        let Some((section, offset)) = anchor else {
            return Ok(false);
        };
        let screen = self.screen_containing(section, offset)?;
        self.go(section, screen)?;
        Ok(true)
    }
}

fn layout(sections: &[Section], font_size: u32, lines_per_screen: usize) -> Vec<Vec<usize>> {
    let capacity = chars_per_screen(font_size, lines_per_screen);
    sections
        .iter()
        .map(|section| screen_starts(&section.text, capacity))
        .collect()
}

/// Page renderer for fixed-layout documents. Paging is clamped to
/// `[1, page_count]`.
pub struct PageRenderer {
    page_count: u32,
    current: Option<u32>,
    events: EventSender,
}

impl PageRenderer {
    pub fn new(page_count: u32, events: EventSender) -> Self {
        Self {
            page_count,
            current: None,
            events,
        }
    }

    fn go(&mut self, page: u32) -> Result<()> {
        self.current = Some(page);
        self.events.relocated(Relocation {
            identifier: page.to_string(),
            section: None,
            page: Some(page),
            at_end: page == self.page_count,
        })
    }
}

#[async_trait]
impl Renderer for PageRenderer {
    async fn display(&mut self, target: &Target) -> Result<()> {
        let page = match target {
            Target::Start => 1,
            Target::Page(page) if (1..=self.page_count).contains(page) => *page,
            Target::Page(page) => {
                return Err(ReaderError::Relocation(format!(
                    "page {page} outside 1..={}",
                    self.page_count
                )));
            }
            other => {
                return Err(ReaderError::Relocation(format!(
                    "{other:?} is not addressable in fixed-layout content"
                )));
            }
        };
        self.go(page)
    }

    async fn next(&mut self) -> Result<()> {
        let page = self.current.unwrap_or(1);
        self.go(page.saturating_add(1).min(self.page_count))
    }

    async fn prev(&mut self) -> Result<()> {
        let page = self.current.unwrap_or(1);
        self.go(page.saturating_sub(1).max(1))
    }
}

/// Plain text has a single position.
pub struct TextRenderer {
    events: EventSender,
}

impl TextRenderer {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    fn stay(&self) -> Result<()> {
        self.events.relocated(Relocation {
            identifier: "0".to_string(),
            section: None,
            page: None,
            at_end: false,
        })
    }
}

#[async_trait]
impl Renderer for TextRenderer {
    async fn display(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Start => self.stay(),
            other => Err(ReaderError::Relocation(format!(
                "{other:?} is not addressable in plain text"
            ))),
        }
    }

    async fn next(&mut self) -> Result<()> {
        self.stay()
    }

    async fn prev(&mut self) -> Result<()> {
        self.stay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventReceiver, SessionEvent, event_channel};

    fn last_identifier(rx: &mut EventReceiver) -> String {
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Relocated(relocation) = event {
                last = Some(relocation.identifier);
            }
        }
        last.expect("a relocation was emitted")
    }

    fn sections() -> Arc<[Section]> {
        let para = "lorem ipsum dolor sit amet ".repeat(20);
        let long = vec![para.trim(); 12].join("\n\n");
        vec![
            Section::new("OEBPS/ch1.xhtml", long.clone()),
            Section::new("OEBPS/ch2.xhtml", long).with_anchor("mid", 3_000),
        ]
        .into()
    }

    #[test]
    fn targets_parse_per_family() {
        assert_eq!(
            Target::parse_for(FormatFamily::FixedLayout, " 60 ").unwrap(),
            Target::Page(60)
        );
        assert!(Target::parse_for(FormatFamily::FixedLayout, "0").is_err());
        assert_eq!(
            Target::parse_for(FormatFamily::Reflowable, "epubcfi(/6/4!/4:10)").unwrap(),
            Target::Locator(Locator::new(1, 10))
        );
        assert_eq!(
            Target::parse_for(FormatFamily::Reflowable, "ch1.xhtml#x").unwrap(),
            Target::Href("ch1.xhtml#x".into())
        );
        assert!(Target::parse_for(FormatFamily::Reflowable, "epubcfi(/6/3!/4:0)").is_err());
        assert!(Target::parse_for(FormatFamily::PlainText, "12").is_err());
    }

    #[tokio::test]
    async fn next_then_prev_returns_to_same_screen() {
        let (tx, mut rx) = event_channel();
        let mut renderer = ReflowRenderer::new(sections(), 16, 10, tx);
        renderer.display(&Target::Href("ch1.xhtml".into())).await.unwrap();
        renderer.next().await.unwrap();
        let here = last_identifier(&mut rx);

        renderer.next().await.unwrap();
        renderer.prev().await.unwrap();
        assert_eq!(last_identifier(&mut rx), here);
    }

    #[tokio::test]
    async fn paging_crosses_sections_and_stops_at_the_end() {
        let (tx, mut rx) = event_channel();
        let mut renderer = ReflowRenderer::new(sections(), 16, 10, tx);
        renderer.display(&Target::Start).await.unwrap();
        for _ in 0..200 {
            renderer.next().await.unwrap();
        }
        let end = last_identifier(&mut rx);
        assert!(end.starts_with("epubcfi(/6/4!"));
        renderer.next().await.unwrap();
        assert_eq!(last_identifier(&mut rx), end);
    }

    #[tokio::test]
    async fn anchors_land_on_their_screen() {
        let (tx, mut rx) = event_channel();
        let mut renderer = ReflowRenderer::new(sections(), 16, 10, tx);
        renderer
            .display(&Target::Href("ch2.xhtml#mid".into()))
            .await
            .unwrap();
        let locator: Locator = last_identifier(&mut rx).parse().unwrap();
        assert_eq!(locator.section, 1);
        assert!(locator.offset > 0 && locator.offset <= 3_000);
    }

    #[tokio::test]
    async fn page_renderer_clamps_and_rejects_out_of_range() {
        let (tx, mut rx) = event_channel();
        let mut renderer = PageRenderer::new(3, tx);
        renderer.display(&Target::Page(3)).await.unwrap();
        renderer.next().await.unwrap();
        assert_eq!(last_identifier(&mut rx), "3");
        assert!(renderer.display(&Target::Page(4)).await.is_err());
        renderer.display(&Target::Start).await.unwrap();
        renderer.prev().await.unwrap();
        assert_eq!(last_identifier(&mut rx), "1");
    }
}
