//! Progress synchronizer: persists settled positions, gated by readiness.
//!
//! A write happens only when all of the following hold:
//! - the owning session is still alive,
//! - the saved position has been restored into the renderer,
//! - the percentage comes from a ready index,
//! - the position is newer than the last one persisted and differs from it.
//!
//! Positions that fail the index gate are remembered as pending and flushed
//! once the index lands. Failed saves are retried on the next relocation.

use crate::cancellation::CancellationToken;
use crate::document::DocumentId;
use crate::index::PositionIndex;
use crate::navigation::CurrentPosition;
use crate::store::{ProgressStore, ProgressUpdate, SavedProgress};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a sync attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Persisted,
    /// Same identifier and percentage as the last write.
    Unchanged,
    /// Saved position not restored yet.
    NotRestored,
    /// No usable percentage yet; kept as pending.
    AwaitingIndex,
    /// Older than a position already persisted.
    Stale,
    /// The store rejected the write; kept as pending.
    Failed,
    /// The session was torn down.
    Dead,
}

pub struct ProgressSynchronizer {
    doc: DocumentId,
    store: Arc<dyn ProgressStore>,
    liveness: CancellationToken,
    finished_threshold: f64,
    restored: bool,
    pending: bool,
    last_persisted: Option<(String, f64)>,
    persisted_seq: u64,
    finished: bool,
}

impl ProgressSynchronizer {
    pub fn new(
        doc: DocumentId,
        store: Arc<dyn ProgressStore>,
        liveness: CancellationToken,
        finished_threshold: f64,
    ) -> Self {
        Self {
            doc,
            store,
            liveness,
            finished_threshold,
            restored: false,
            pending: false,
            last_persisted: None,
            persisted_seq: 0,
            finished: false,
        }
    }

    /// Remember what the store already holds so restoring it is not
    /// written back.
    pub fn seed(&mut self, saved: &SavedProgress) {
        if let Some(identifier) = saved.restore_target() {
            self.last_persisted = Some((identifier.to_string(), saved.percentage));
        }
        self.finished = saved.finished;
    }

    pub fn mark_restored(&mut self) {
        self.restored = true;
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Persist `position` if every gate allows it.
    pub async fn sync(&mut self, position: &CurrentPosition, index: &PositionIndex) -> SyncOutcome {
        if self.liveness.is_cancelled() {
            debug!(doc = %self.doc, "Session closed; dropping progress write");
            return SyncOutcome::Dead;
        }
        if !self.restored {
            return SyncOutcome::NotRestored;
        }
        if position.seq < self.persisted_seq {
            debug!(seq = position.seq, persisted = self.persisted_seq, "Stale position");
            return SyncOutcome::Stale;
        }
        let Some(percentage) = position.percentage.filter(|_| index.is_ready()) else {
            self.pending = true;
            debug!(identifier = %position.identifier, "Deferring progress until index is ready");
            return SyncOutcome::AwaitingIndex;
        };

        let finished =
            self.finished || position.at_end || percentage >= self.finished_threshold;
        if finished == self.finished
            && self
                .last_persisted
                .as_ref()
                .is_some_and(|(identifier, pct)| {
                    *identifier == position.identifier && *pct == percentage
                })
        {
            self.pending = false;
            self.persisted_seq = position.seq;
            return SyncOutcome::Unchanged;
        }

        let update = ProgressUpdate {
            identifier: position.identifier.clone(),
            percentage,
            finished,
        };
        match self.store.save(&self.doc, &update).await {
            Ok(_) => {
                info!(
                    doc = %self.doc,
                    identifier = %update.identifier,
                    percentage,
                    finished,
                    "Saved progress"
                );
                self.last_persisted = Some((update.identifier, percentage));
                self.persisted_seq = position.seq;
                self.finished = finished;
                self.pending = false;
                SyncOutcome::Persisted
            }
            Err(err) => {
                warn!(doc = %self.doc, "Failed to save progress: {err:#}");
                self.pending = true;
                SyncOutcome::Failed
            }
        }
    }

    /// Retry a deferred position, e.g. after the index was built.
    pub async fn flush_pending(
        &mut self,
        position: &CurrentPosition,
        index: &PositionIndex,
    ) -> Option<SyncOutcome> {
        if !self.pending {
            return None;
        }
        Some(self.sync(position, index).await)
    }
}
