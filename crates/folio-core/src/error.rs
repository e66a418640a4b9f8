//! Error types for reading sessions.
//!
//! Failures are grouped by the component that raises them. Only
//! [`ReaderError::Load`] is allowed to reach the user as a blocking failure;
//! every other category is contained where it originates and degrades the
//! session instead of ending it.
//!
//! ## Error Categories
//!
//! - **Load**: metadata or content fetch failed, or the payload could not be
//!   parsed for its format family
//! - **IndexBuild**: the reflowable location index could not be built
//! - **Relocation**: a jump target was invalid or the renderer rejected it
//! - **Persistence**: the progress or bookmark store failed
//! - **Mapping**: a single outline entry or bookmark could not be converted
//!   to a percentage
//!
//! ```rust
//! use folio_core::ReaderError;
//!
//! let err = ReaderError::Mapping("no such section".into());
//! assert_eq!(err.category(), "mapping");
//! assert!(!err.is_blocking());
//! ```

use thiserror::Error;

/// The error type for every fallible session operation.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Fetching or parsing the document failed. Terminal for the session.
    #[error("Load error: {0}")]
    Load(String),

    /// Building the location index failed; reading continues without
    /// percentages.
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// A navigation target could not be displayed.
    #[error("Relocation error: {0}")]
    Relocation(String),

    /// Saving or deleting a record in an external store failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An identifier could not be converted to a percentage.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning session was torn down while the operation was in flight.
    #[error("Operation cancelled at stage={stage}")]
    Cancelled {
        /// Where the liveness check failed
        stage: &'static str,
    },
}

impl ReaderError {
    /// Whether the failure must be shown to the user and block reading.
    ///
    /// ```rust
    /// use folio_core::ReaderError;
    ///
    /// assert!(ReaderError::Load("404".into()).is_blocking());
    /// assert!(!ReaderError::Persistence("timeout".into()).is_blocking());
    /// ```
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Load(_))
    }

    /// Stable short label used in structured logs.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::IndexBuild(_) => "index_build",
            Self::Relocation(_) => "relocation",
            Self::Persistence(_) => "persistence",
            Self::Mapping(_) => "mapping",
            Self::Config(_) => "config",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub(crate) fn load(context: &str, err: &anyhow::Error) -> Self {
        Self::Load(format!("{context}: {err:#}"))
    }

    pub(crate) fn persistence(context: &str, err: &anyhow::Error) -> Self {
        Self::Persistence(format!("{context}: {err:#}"))
    }
}

/// Convenience alias for session results.
pub type Result<T> = std::result::Result<T, ReaderError>;
