//! Core of the folio reader: document loading, position indexing,
//! navigation, progress sync, outline mapping and bookmarks for EPUB, PDF
//! and plain-text documents.

pub mod bookmarks;
pub mod cancellation;
pub mod config;
pub mod document;
pub mod epub_loader;
pub mod error;
pub mod events;
pub mod index;
pub mod loader;
pub mod navigation;
pub mod outline;
pub mod pagination;
pub mod pdf_loader;
pub mod progress;
pub mod renderer;
pub mod session;
pub mod source;
pub mod store;

pub use cancellation::CancellationToken;
pub use config::{PlainTextProgress, ReaderConfig, load_config};
pub use document::{Document, DocumentId, FormatFamily};
pub use error::{ReaderError, Result};
pub use session::{Collaborators, LoadState, ReadingSession, SessionHost, SessionSnapshot};

use anyhow::Context;
use std::fs;
use std::path::Path;
use ts_rs::TS;

fn export_single_type<T: TS + 'static>(out_dir: &Path) -> anyhow::Result<()> {
    T::export_all_to(out_dir).with_context(|| format!("Failed to export {}", T::name()))
}

/// Write TypeScript definitions for every type the UI receives, plus an
/// `index.ts` re-exporting them. Stale `.ts` files in `out_dir` are removed.
pub fn export_ts_bindings(out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    for entry in
        fs::read_dir(out_dir).with_context(|| format!("Failed to list {}", out_dir.display()))?
    {
        let path = entry.context("Failed to read entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("ts") {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }

    export_single_type::<DocumentId>(out_dir)?;
    export_single_type::<FormatFamily>(out_dir)?;
    export_single_type::<PlainTextProgress>(out_dir)?;
    export_single_type::<navigation::NavState>(out_dir)?;
    export_single_type::<navigation::CurrentPosition>(out_dir)?;
    export_single_type::<outline::OutlineEntry>(out_dir)?;
    export_single_type::<outline::Marker>(out_dir)?;
    export_single_type::<store::SavedProgress>(out_dir)?;
    export_single_type::<store::Bookmark>(out_dir)?;
    export_single_type::<LoadState>(out_dir)?;
    export_single_type::<SessionSnapshot>(out_dir)?;

    let index_content = r#"export type { DocumentId } from "./DocumentId";
export type { FormatFamily } from "./FormatFamily";
export type { PlainTextProgress } from "./PlainTextProgress";
export type { NavState } from "./NavState";
export type { CurrentPosition } from "./CurrentPosition";
export type { OutlineEntry } from "./OutlineEntry";
export type { Marker } from "./Marker";
export type { SavedProgress } from "./SavedProgress";
export type { Bookmark } from "./Bookmark";
export type { LoadState } from "./LoadState";
export type { SessionSnapshot } from "./SessionSnapshot";
"#;

    let index_path = out_dir.join("index.ts");
    fs::write(&index_path, index_content)
        .with_context(|| format!("Failed to write {}", index_path.display()))?;

    Ok(())
}
