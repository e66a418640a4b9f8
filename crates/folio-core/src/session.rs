//! Reading sessions.
//!
//! A [`ReadingSession`] owns everything about one open document: the
//! renderer, the position index, the outline, bookmarks and the progress
//! synchronizer. It is the sole consumer of its event channel and applies
//! events one at a time, in the order they were sent.
//!
//! [`SessionHost`] keeps at most one session alive. Opening a document tears
//! the previous session down first; its background tasks are cancelled and
//! anything they still produce is discarded.

use crate::bookmarks::BookmarkManager;
use crate::cancellation::CancellationToken;
use crate::config::ReaderConfig;
use crate::document::{Document, DocumentId, FormatFamily};
use crate::events::{EventReceiver, EventSender, SessionEvent, event_channel};
use crate::index::{IndexState, LocationIndex, PositionIndex, build_location_index};
use crate::loader::{
    BookContent, BuiltinParser, FormatParser, OutlineWalk, Section, load_document,
};
use crate::navigation::{CurrentPosition, NavState, NavigationController};
use crate::outline::{
    Marker, OutlineEntry, OutlineNode, ReflowContext, map_fixed_layout, map_reflowable,
    map_unresolved, markers,
};
use crate::pagination::{MAX_FONT_SIZE, MIN_FONT_SIZE};
use crate::progress::ProgressSynchronizer;
use crate::renderer::{PageRenderer, ReflowRenderer, Renderer, Target, TextRenderer};
use crate::source::{ContentSource, FsContentSource};
use crate::store::{Bookmark, BookmarkStore, FileStore, ProgressStore, SavedProgress};
use crate::{ReaderError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

/// External services a session reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentSource>,
    pub parser: Arc<dyn FormatParser>,
    pub progress: Arc<dyn ProgressStore>,
    pub bookmarks: Arc<dyn BookmarkStore>,
}

impl Collaborators {
    /// Local files plus TOML stores under the configured cache dir.
    pub fn file_backed(config: &ReaderConfig) -> Self {
        let store = Arc::new(FileStore::new(config.cache_dir.clone()));
        Self {
            content: Arc::new(FsContentSource),
            parser: Arc::new(BuiltinParser),
            progress: store.clone(),
            bookmarks: store,
        }
    }
}

/// Coarse session state shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum LoadState {
    Ready,
    Error,
}

/// Everything the UI renders, in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct SessionSnapshot {
    pub state: LoadState,
    pub document_id: DocumentId,
    pub title: Option<String>,
    pub family: Option<FormatFamily>,
    pub nav_state: Option<NavState>,
    pub position: Option<CurrentPosition>,
    pub index_ready: bool,
    pub font_size: u32,
    pub finished: bool,
    pub outline: Vec<OutlineEntry>,
    pub markers: Vec<Marker>,
    pub bookmarks: Vec<Bookmark>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// Snapshot for a document whose load failed.
    pub fn failed(document_id: DocumentId, message: impl Into<String>) -> Self {
        Self {
            state: LoadState::Error,
            document_id,
            title: None,
            family: None,
            nav_state: None,
            position: None,
            index_ready: false,
            font_size: 0,
            finished: false,
            outline: Vec::new(),
            markers: Vec::new(),
            bookmarks: Vec::new(),
            error: Some(message.into()),
        }
    }
}

enum Step {
    Next,
    Prev,
    Display(Target),
}

pub struct ReadingSession {
    document: Document,
    config: ReaderConfig,
    liveness: CancellationToken,
    renderer: Box<dyn Renderer>,
    events: EventReceiver,
    index: PositionIndex,
    sections: Option<Arc<[Section]>>,
    toc: Vec<OutlineNode>,
    outline_resolved: bool,
    outline: Vec<OutlineEntry>,
    markers: Vec<Marker>,
    nav: NavigationController,
    sync: ProgressSynchronizer,
    bookmarks: BookmarkManager,
    background: Vec<JoinHandle<()>>,
}

impl ReadingSession {
    /// Load `id`, start background work, restore the saved position.
    ///
    /// Only load failures are returned; everything after the content is
    /// parsed degrades instead of failing.
    pub async fn open(
        id: DocumentId,
        collaborators: &Collaborators,
        config: &ReaderConfig,
        liveness: CancellationToken,
    ) -> Result<Self> {
        let config = config.clone().clamped();
        let loaded = load_document(
            collaborators.content.as_ref(),
            collaborators.parser.as_ref(),
            &id,
        )
        .await?;
        liveness.check_cancelled("load")?;

        let (events_tx, events) = event_channel();
        let mut background = Vec::new();
        let (renderer, index, sections, toc, outline_resolved): (
            Box<dyn Renderer>,
            PositionIndex,
            Option<Arc<[Section]>>,
            Vec<OutlineNode>,
            bool,
        ) = match loaded.content {
            BookContent::Reflowable(reflow) => {
                let sections: Arc<[Section]> = reflow.sections.into();
                background.push(spawn_index_build(
                    sections.clone(),
                    config.chars_per_location,
                    liveness.clone(),
                    events_tx.clone(),
                ));
                let renderer = ReflowRenderer::new(
                    sections.clone(),
                    config.font_size,
                    config.lines_per_screen,
                    events_tx,
                );
                (
                    Box::new(renderer) as Box<dyn Renderer>,
                    PositionIndex::Reflowable(IndexState::Building),
                    Some(sections),
                    reflow.toc,
                    true,
                )
            }
            BookContent::FixedLayout(fixed) => {
                background.push(spawn_outline_walk(
                    fixed.outline,
                    liveness.clone(),
                    events_tx.clone(),
                ));
                (
                    Box::new(PageRenderer::new(fixed.page_count, events_tx)) as Box<dyn Renderer>,
                    PositionIndex::FixedLayout {
                        page_count: fixed.page_count,
                    },
                    None,
                    Vec::new(),
                    false,
                )
            }
            BookContent::PlainText(text) => {
                debug!(chars = text.len(), "Plain text document");
                (
                    Box::new(TextRenderer::new(events_tx)) as Box<dyn Renderer>,
                    PositionIndex::PlainText(config.plain_text_progress),
                    None,
                    Vec::new(),
                    true,
                )
            }
        };

        let mut session = Self {
            sync: ProgressSynchronizer::new(
                id.clone(),
                collaborators.progress.clone(),
                liveness.clone(),
                config.finished_threshold,
            ),
            bookmarks: BookmarkManager::new(id.clone(), collaborators.bookmarks.clone()),
            document: loaded.document,
            config,
            liveness,
            renderer,
            events,
            index,
            sections,
            toc,
            outline_resolved,
            outline: Vec::new(),
            markers: Vec::new(),
            nav: NavigationController::new(),
            background,
        };
        session.remap_outline();

        let saved = match collaborators.progress.load(&id).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(doc = %id, "Failed to load saved progress: {err:#}");
                None
            }
        };
        if let Some(saved) = &saved {
            session.sync.seed(saved);
        }
        session.bookmarks.load().await;
        session.liveness.check_cancelled("restore")?;

        let target = saved
            .as_ref()
            .and_then(SavedProgress::restore_target)
            .map(str::to_string);
        session.restore(target).await;
        session.sync.mark_restored();
        session.nav.mark_ready();

        info!(
            doc = %session.document.id,
            family = %session.document.family,
            title = %session.document.title,
            "Session ready"
        );
        Ok(session)
    }

    /// Display the saved target, falling back to the start of the document.
    async fn restore(&mut self, saved: Option<String>) {
        if let Some(raw) = saved {
            match Target::parse_for(self.document.family, &raw) {
                Ok(target) => match self.renderer.display(&target).await {
                    Ok(()) => {
                        if self.settle().await {
                            info!(identifier = %raw, "Restored saved position");
                            return;
                        }
                        warn!(identifier = %raw, "Saved position never settled");
                    }
                    Err(err) => warn!(identifier = %raw, "Cannot restore saved position: {err}"),
                },
                Err(err) => warn!(identifier = %raw, "Saved position is unusable: {err}"),
            }
        }
        match self.renderer.display(&Target::Start).await {
            Ok(()) => {
                self.settle().await;
            }
            Err(err) => warn!("Cannot display document start: {err}"),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn position(&self) -> Option<&CurrentPosition> {
        self.nav.position()
    }

    pub fn nav_state(&self) -> NavState {
        self.nav.state()
    }

    pub fn index(&self) -> &PositionIndex {
        &self.index
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        self.bookmarks.list()
    }

    pub fn font_size(&self) -> u32 {
        self.config.font_size
    }

    pub fn is_alive(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    pub async fn next(&mut self) -> Result<()> {
        match &self.index {
            PositionIndex::PlainText(_) => Ok(()),
            PositionIndex::FixedLayout { page_count } => {
                let page = self.nav.current_page().unwrap_or(1);
                let target = page.saturating_add(1).min(*page_count);
                self.navigate(Step::Display(Target::Page(target))).await
            }
            PositionIndex::Reflowable(_) => self.navigate(Step::Next).await,
        }
    }

    pub async fn prev(&mut self) -> Result<()> {
        match &self.index {
            PositionIndex::PlainText(_) => Ok(()),
            PositionIndex::FixedLayout { .. } => {
                let page = self.nav.current_page().unwrap_or(1);
                let target = page.saturating_sub(1).max(1);
                self.navigate(Step::Display(Target::Page(target))).await
            }
            PositionIndex::Reflowable(_) => self.navigate(Step::Prev).await,
        }
    }

    /// Jump to a page number, locator or section href. Invalid targets are
    /// logged and ignored; the return value says whether the jump happened.
    pub async fn jump_to(&mut self, raw: &str) -> bool {
        let target = match Target::parse_for(self.document.family, raw) {
            Ok(target) => target,
            Err(err) => {
                debug!(target = %raw, category = err.category(), "Ignoring jump: {err}");
                return false;
            }
        };
        match self.navigate(Step::Display(target)).await {
            Ok(()) => true,
            Err(err) => {
                debug!(target = %raw, category = err.category(), "Ignoring jump: {err}");
                false
            }
        }
    }

    /// Jump to the location nearest `percentage`. Needs a ready index for
    /// reflowable documents.
    pub async fn jump_to_percentage(&mut self, percentage: f64) -> bool {
        if !percentage.is_finite() {
            return false;
        }
        let percentage = percentage.clamp(0.0, 1.0);
        let raw = match &self.index {
            PositionIndex::Reflowable(IndexState::Ready(index)) => index.identifier_at(percentage),
            PositionIndex::Reflowable(_) => {
                debug!("Percentage jump needs the location index");
                None
            }
            PositionIndex::FixedLayout { page_count } => {
                let page = (percentage * f64::from(*page_count)).ceil() as u32;
                Some(page.clamp(1, *page_count).to_string())
            }
            PositionIndex::PlainText(_) => None,
        };
        match raw {
            Some(raw) => self.jump_to(&raw).await,
            None => false,
        }
    }

    pub async fn jump_to_bookmark(&mut self, id: u64) -> bool {
        let Some(identifier) = self
            .bookmarks
            .find(id)
            .map(|bookmark| bookmark.identifier.clone())
        else {
            debug!(id, "No such bookmark");
            return false;
        };
        self.jump_to(&identifier).await
    }

    /// Bookmark the current position.
    pub async fn add_bookmark(&mut self) -> Result<Bookmark> {
        self.liveness.check_cancelled("bookmark")?;
        let position = self
            .nav
            .position()
            .cloned()
            .ok_or_else(|| ReaderError::Relocation("nothing is displayed yet".into()))?;
        self.bookmarks.create(&position, &self.outline).await
    }

    pub async fn delete_bookmark(&mut self, id: u64) -> Result<()> {
        self.liveness.check_cancelled("bookmark")?;
        self.bookmarks.delete(id).await
    }

    /// Change the font size. Reflowable content re-lays out around the
    /// current position; the location index is unaffected.
    pub async fn set_font_size(&mut self, font_size: u32) -> Result<()> {
        self.liveness.check_cancelled("typography")?;
        let font_size = font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.config.font_size = font_size;
        if self.renderer.set_font_size(font_size).await? {
            self.settle().await;
        }
        Ok(())
    }

    /// Apply every event that is already queued. Returns how many there were.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Wait until the location index build has finished, either way.
    pub async fn wait_for_index(&mut self) {
        while self.index.is_building() && self.is_alive() {
            match self.events.recv().await {
                Some(event) => {
                    self.handle_event(event).await;
                }
                None => break,
            }
        }
    }

    /// Wait until the outline has been resolved.
    pub async fn wait_for_outline(&mut self) {
        while !self.outline_resolved && self.is_alive() {
            match self.events.recv().await {
                Some(event) => {
                    self.handle_event(event).await;
                }
                None => break,
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: LoadState::Ready,
            document_id: self.document.id.clone(),
            title: Some(self.document.title.clone()),
            family: Some(self.document.family),
            nav_state: Some(self.nav.state()),
            position: self.nav.position().cloned(),
            index_ready: self.index.is_ready(),
            font_size: self.config.font_size,
            finished: self.sync.is_finished(),
            outline: self.outline.clone(),
            markers: self.markers.clone(),
            bookmarks: self.bookmarks.list().to_vec(),
            error: None,
        }
    }

    async fn navigate(&mut self, step: Step) -> Result<()> {
        self.liveness.check_cancelled("navigate")?;
        self.nav.begin_navigation();
        let sent = match &step {
            Step::Next => self.renderer.next().await,
            Step::Prev => self.renderer.prev().await,
            Step::Display(target) => self.renderer.display(target).await,
        };
        if let Err(err) = sent {
            self.nav.end_navigation();
            return Err(err);
        }
        self.settle().await;
        Ok(())
    }

    /// Apply events until the next relocation. Returns `false` on timeout.
    async fn settle(&mut self) -> bool {
        let deadline = Instant::now() + self.config.relocation_timeout();
        loop {
            match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => {
                    if self.handle_event(event).await {
                        return true;
                    }
                }
                Ok(None) => return false,
                Err(_) => {
                    warn!(doc = %self.document.id, "Timed out waiting for relocation");
                    self.nav.end_navigation();
                    return false;
                }
            }
        }
    }

    /// Returns whether the event was a relocation.
    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        if self.liveness.is_cancelled() {
            debug!("Dropping event for closed session");
            return false;
        }
        match event {
            SessionEvent::Relocated(relocation) => {
                let position = self.nav.apply_relocation(relocation, &self.index).clone();
                self.sync.sync(&position, &self.index).await;
                true
            }
            SessionEvent::IndexBuilt(result) => {
                self.on_index_built(result).await;
                false
            }
            SessionEvent::OutlineResolved(result) => {
                self.on_outline_resolved(result);
                false
            }
        }
    }

    async fn on_index_built(&mut self, result: Result<LocationIndex>) {
        match result {
            Ok(index) => {
                self.index = PositionIndex::Reflowable(IndexState::Ready(Arc::new(index)));
                self.remap_outline();
                if let Some(position) = self.nav.refresh_percentage(&self.index).cloned() {
                    self.sync.flush_pending(&position, &self.index).await;
                }
            }
            Err(err) => {
                warn!(
                    doc = %self.document.id,
                    category = err.category(),
                    "Reading on without percentages: {err}"
                );
                self.index = PositionIndex::Reflowable(IndexState::Failed(err.to_string()));
            }
        }
    }

    fn on_outline_resolved(&mut self, result: anyhow::Result<Vec<OutlineNode>>) {
        match result {
            Ok(nodes) => self.toc = nodes,
            Err(err) => warn!(doc = %self.document.id, "Outline unavailable: {err:#}"),
        }
        self.outline_resolved = true;
        self.remap_outline();
    }

    fn remap_outline(&mut self) {
        self.outline = match &self.index {
            PositionIndex::Reflowable(state) => {
                let ctx = ReflowContext {
                    sections: self.sections.as_deref().unwrap_or(&[]),
                    index: match state {
                        IndexState::Ready(index) => Some(index.as_ref()),
                        _ => None,
                    },
                };
                map_reflowable(&self.toc, &ctx)
            }
            PositionIndex::FixedLayout { page_count } => map_fixed_layout(&self.toc, *page_count),
            PositionIndex::PlainText(_) => map_unresolved(&self.toc),
        };
        self.markers = markers(&self.outline);
        debug!(
            entries = self.outline.len(),
            markers = self.markers.len(),
            "Mapped outline"
        );
    }
}

impl Drop for ReadingSession {
    fn drop(&mut self) {
        self.liveness.cancel();
        for task in self.background.drain(..) {
            task.abort();
        }
        debug!(doc = %self.document.id, "Session torn down");
    }
}

fn spawn_index_build(
    sections: Arc<[Section]>,
    chars_per_location: usize,
    liveness: CancellationToken,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = build_location_index(sections, chars_per_location, liveness.clone()).await;
        if liveness.is_cancelled() {
            debug!("Discarding location index for closed session");
            return;
        }
        if events.send(SessionEvent::IndexBuilt(result)).is_err() {
            debug!("Session gone before index landed");
        }
    })
}

fn spawn_outline_walk(
    outline: OutlineWalk,
    liveness: CancellationToken,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = outline.resolve().await;
        if liveness.is_cancelled() {
            debug!("Discarding outline for closed session");
            return;
        }
        if events.send(SessionEvent::OutlineResolved(result)).is_err() {
            debug!("Session gone before outline landed");
        }
    })
}

/// Owns the single active session.
pub struct SessionHost {
    collaborators: Collaborators,
    config: ReaderConfig,
    active: Option<(u64, ReadingSession)>,
    failure: Option<SessionSnapshot>,
    next_request_id: u64,
}

impl SessionHost {
    pub fn new(collaborators: Collaborators, config: ReaderConfig) -> Self {
        Self {
            collaborators,
            config: config.clamped(),
            active: None,
            failure: None,
            next_request_id: 1,
        }
    }

    fn allocate_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        request_id
    }

    /// Tear down the active session, then open `id`.
    pub async fn open(&mut self, id: DocumentId) -> Result<&mut ReadingSession> {
        self.close();
        let request_id = self.allocate_request_id();
        info!(request_id, doc = %id, "Opening document");

        let liveness = CancellationToken::new();
        match ReadingSession::open(id.clone(), &self.collaborators, &self.config, liveness).await {
            Ok(session) => {
                self.failure = None;
                let (_, session) = self.active.insert((request_id, session));
                Ok(session)
            }
            Err(err) => {
                error!(request_id, doc = %id, category = err.category(), "Open failed: {err}");
                self.failure = Some(SessionSnapshot::failed(id, err.to_string()));
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if let Some((request_id, session)) = self.active.take() {
            info!(request_id, doc = %session.document().id, "Closing session");
            drop(session);
        }
        self.failure = None;
    }

    pub fn active(&mut self) -> Option<&mut ReadingSession> {
        self.active.as_mut().map(|(_, session)| session)
    }

    pub fn active_request_id(&self) -> Option<u64> {
        self.active.as_ref().map(|(request_id, _)| *request_id)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        match &self.active {
            Some((_, session)) => Some(session.snapshot()),
            None => self.failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryContentSource;
    use crate::store::{MemoryBookmarkStore, MemoryProgressStore};

    fn collaborators(source: MemoryContentSource) -> (Collaborators, Arc<MemoryProgressStore>) {
        let progress = Arc::new(MemoryProgressStore::new());
        let collaborators = Collaborators {
            content: Arc::new(source),
            parser: Arc::new(BuiltinParser),
            progress: progress.clone(),
            bookmarks: Arc::new(MemoryBookmarkStore::new()),
        };
        (collaborators, progress)
    }

    #[tokio::test]
    async fn plain_text_navigation_is_a_no_op() {
        let source = MemoryContentSource::new();
        source.insert("t1", "Notes", "TXT", Some(b"just some words".to_vec()));
        let (collaborators, progress) = collaborators(source);

        let mut session = ReadingSession::open(
            "t1".into(),
            &collaborators,
            &ReaderConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        session.next().await.unwrap();
        session.prev().await.unwrap();

        let position = session.position().unwrap();
        assert_eq!(position.identifier, "0");
        assert_eq!(position.percentage, None);
        assert!(!session.jump_to("12").await);
        assert!(progress.saves().is_empty());
    }

    #[tokio::test]
    async fn plain_text_whole_document_mode_persists() {
        let source = MemoryContentSource::new();
        source.insert("t1", "Notes", "MD", Some(b"# heading".to_vec()));
        let (collaborators, progress) = collaborators(source);
        let config = ReaderConfig {
            plain_text_progress: crate::config::PlainTextProgress::WholeDocument,
            ..ReaderConfig::default()
        };

        let mut session =
            ReadingSession::open("t1".into(), &collaborators, &config, CancellationToken::new())
                .await
                .unwrap();
        assert!(progress.saves().is_empty());
        session.add_bookmark().await.unwrap();
        assert!(session.jump_to("0").await);
        assert_eq!(progress.saves().len(), 1);
        assert_eq!(progress.saves()[0].1.percentage, 0.0);
        assert_eq!(session.bookmarks()[0].label.as_deref(), Some("0%"));
    }

    #[tokio::test]
    async fn failed_open_leaves_error_snapshot() {
        let source = MemoryContentSource::new();
        source.insert("gone", "Missing", "EPUB", None);
        let (collaborators, _) = collaborators(source);
        let mut host = SessionHost::new(collaborators, ReaderConfig::default());

        let err = host.open("gone".into()).await.err().unwrap();
        assert!(err.is_blocking());
        let snapshot = host.snapshot().unwrap();
        assert_eq!(snapshot.state, LoadState::Error);
        assert!(snapshot.error.unwrap().contains("fetch content"));
        assert!(host.active().is_none());
    }

    #[tokio::test]
    async fn request_ids_increase_per_open() {
        let source = MemoryContentSource::new();
        source.insert("a", "A", "TXT", Some(b"a".to_vec()));
        source.insert("b", "B", "TXT", Some(b"b".to_vec()));
        let (collaborators, _) = collaborators(source);
        let mut host = SessionHost::new(collaborators, ReaderConfig::default());

        host.open("a".into()).await.unwrap();
        let first = host.active_request_id().unwrap();
        host.open("b".into()).await.unwrap();
        assert_eq!(host.active_request_id(), Some(first + 1));
        assert_eq!(host.snapshot().unwrap().document_id, DocumentId::new("b"));
    }
}
