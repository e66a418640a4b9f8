//! Current-position state machine.
//!
//! The controller is the only writer of [`CurrentPosition`]. Relocations are
//! applied in the order they were received and each one bumps a monotonic
//! sequence number that the progress synchronizer uses to reject stale work.

use crate::events::Relocation;
use crate::index::PositionIndex;
use serde::Serialize;
use tracing::trace;
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum NavState {
    Loading,
    Ready,
    Navigating,
}

/// Where the reader is right now.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct CurrentPosition {
    pub identifier: String,
    pub percentage: Option<f64>,
    pub section: Option<String>,
    pub page: Option<u32>,
    /// Last screen or page of the document.
    pub at_end: bool,
    #[serde(skip)]
    pub seq: u64,
}

#[derive(Debug)]
pub struct NavigationController {
    state: NavState,
    position: Option<CurrentPosition>,
    seq: u64,
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationController {
    pub fn new() -> Self {
        Self {
            state: NavState::Loading,
            position: None,
            seq: 0,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn position(&self) -> Option<&CurrentPosition> {
        self.position.as_ref()
    }

    pub fn current_page(&self) -> Option<u32> {
        self.position.as_ref().and_then(|pos| pos.page)
    }

    /// Initial restore finished; user navigation is accepted from now on.
    pub fn mark_ready(&mut self) {
        self.state = NavState::Ready;
    }

    pub fn begin_navigation(&mut self) {
        if self.state == NavState::Ready {
            self.state = NavState::Navigating;
        }
    }

    /// Navigation ended without a relocation (rejected target or timeout).
    pub fn end_navigation(&mut self) {
        if self.state == NavState::Navigating {
            self.state = NavState::Ready;
        }
    }

    /// Record a relocation and recompute its percentage, best effort.
    pub fn apply_relocation(
        &mut self,
        relocation: Relocation,
        index: &PositionIndex,
    ) -> &CurrentPosition {
        self.seq += 1;
        let percentage = index.percentage_for(&relocation.identifier);
        trace!(
            seq = self.seq,
            identifier = %relocation.identifier,
            ?percentage,
            "Applied relocation"
        );
        self.end_navigation();
        self.position.insert(CurrentPosition {
            identifier: relocation.identifier,
            percentage,
            section: relocation.section,
            page: relocation.page,
            at_end: relocation.at_end,
            seq: self.seq,
        })
    }

    /// Fill in the percentage once the index can answer. The sequence number
    /// is kept: this is the same position, not a new one.
    pub fn refresh_percentage(&mut self, index: &PositionIndex) -> Option<&CurrentPosition> {
        let position = self.position.as_mut()?;
        position.percentage = index.percentage_for(&position.identifier);
        Some(position)
    }
}
