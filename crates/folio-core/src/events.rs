//! Events delivered to a session on its single-consumer channel.

use crate::index::LocationIndex;
use crate::outline::OutlineNode;
use crate::{ReaderError, Result};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// The visible reading position changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Native identifier: locator for reflowable, page number for
    /// fixed-layout, `"0"` for plain text.
    pub identifier: String,
    /// Href of the containing section (reflowable).
    pub section: Option<String>,
    /// 1-based page (fixed-layout).
    pub page: Option<u32>,
    /// Nothing lies beyond this position; paging forward stays put.
    pub at_end: bool,
}

/// Everything that can wake a session up.
#[derive(Debug)]
pub enum SessionEvent {
    Relocated(Relocation),
    IndexBuilt(Result<LocationIndex>),
    OutlineResolved(anyhow::Result<Vec<OutlineNode>>),
}

pub type EventReceiver = UnboundedReceiver<SessionEvent>;

/// Sending half handed to renderers and background tasks.
#[derive(Debug, Clone)]
pub struct EventSender(UnboundedSender<SessionEvent>);

impl EventSender {
    pub fn send(&self, event: SessionEvent) -> Result<()> {
        self.0
            .send(event)
            .map_err(|_| ReaderError::Relocation("session event channel is closed".into()))
    }

    pub fn relocated(&self, relocation: Relocation) -> Result<()> {
        self.send(SessionEvent::Relocated(relocation))
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded_channel();
    (EventSender(tx), rx)
}
