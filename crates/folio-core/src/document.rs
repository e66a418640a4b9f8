//! Document identity and format classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

/// Opaque document identifier handed out by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Addressing family of a document payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum FormatFamily {
    /// Re-paginates with the viewport; addressed by fragment identifiers.
    Reflowable,
    /// Fixed page count; addressed by 1-based page numbers.
    FixedLayout,
    /// No native addressing.
    PlainText,
}

impl FormatFamily {
    /// Classify a library format label such as `EPUB` or `pdf`.
    ///
    /// Anything that is neither EPUB nor PDF is read as plain text.
    pub fn classify(format: &str) -> Self {
        match format.trim().trim_start_matches('.').to_ascii_uppercase().as_str() {
            "EPUB" => FormatFamily::Reflowable,
            "PDF" => FormatFamily::FixedLayout,
            _ => FormatFamily::PlainText,
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FormatFamily::Reflowable => "reflowable",
            FormatFamily::FixedLayout => "fixed-layout",
            FormatFamily::PlainText => "plain-text",
        };
        f.write_str(label)
    }
}

/// Metadata returned by the content source before content is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub format: String,
}

/// A document opened for reading. Content bytes live only in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub family: FormatFamily,
    pub title: String,
}
