use crate::{ReaderError, Result};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Liveness flag shared between a session and the tasks it spawned.
///
/// Tearing a session down cancels its token; every async continuation checks
/// it before touching shared state.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ReaderError::Cancelled { stage });
        }
        Ok(())
    }
}
