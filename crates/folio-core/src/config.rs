//! Configuration loading for reading sessions.
//!
//! All tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so a session can still open.

use crate::pagination;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use ts_rs::TS;

/// Smallest allowed location unit, in characters.
pub const MIN_CHARS_PER_LOCATION: usize = 128;
/// Largest allowed location unit, in characters.
pub const MAX_CHARS_PER_LOCATION: usize = 16_384;

/// High-level reader configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReaderConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_chars_per_location")]
    pub chars_per_location: usize,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_lines_per_screen")]
    pub lines_per_screen: usize,
    #[serde(default = "default_finished_threshold")]
    pub finished_threshold: f64,
    #[serde(default)]
    pub plain_text_progress: PlainTextProgress,
    #[serde(default = "default_relocation_timeout_ms")]
    pub relocation_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            log_level: default_log_level(),
            cache_dir: default_cache_dir(),
            chars_per_location: default_chars_per_location(),
            font_size: default_font_size(),
            lines_per_screen: default_lines_per_screen(),
            finished_threshold: default_finished_threshold(),
            plain_text_progress: PlainTextProgress::default(),
            relocation_timeout_ms: default_relocation_timeout_ms(),
        }
    }
}

impl ReaderConfig {
    /// Pull every numeric field back into its supported range.
    pub fn clamped(mut self) -> Self {
        self.chars_per_location = self
            .chars_per_location
            .clamp(MIN_CHARS_PER_LOCATION, MAX_CHARS_PER_LOCATION);
        self.font_size = self
            .font_size
            .clamp(pagination::MIN_FONT_SIZE, pagination::MAX_FONT_SIZE);
        self.lines_per_screen = self.lines_per_screen.clamp(
            pagination::MIN_LINES_PER_SCREEN,
            pagination::MAX_LINES_PER_SCREEN,
        );
        if !self.finished_threshold.is_finite() {
            self.finished_threshold = default_finished_threshold();
        }
        self.finished_threshold = self.finished_threshold.clamp(0.5, 1.0);
        self.relocation_timeout_ms = self.relocation_timeout_ms.clamp(50, 60_000);
        self
    }

    pub fn relocation_timeout(&self) -> Duration {
        Duration::from_millis(self.relocation_timeout_ms)
    }
}

/// Whether plain-text documents report and persist progress.
///
/// Plain text has no native addressing, so the only honest unit is the whole
/// document. `Off` keeps position session-local; `WholeDocument` reports a
/// single unit at 0% and persists it like any other format.
#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum PlainTextProgress {
    #[default]
    Off,
    WholeDocument,
}

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> ReaderConfig {
    let contents = match std::fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded reader config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return ReaderConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            ReaderConfig::default()
        }
    }
}

/// Parse and clamp a TOML config document.
pub fn parse_config(contents: &str) -> crate::Result<ReaderConfig> {
    toml::from_str::<ReaderConfig>(contents)
        .map(ReaderConfig::clamped)
        .map_err(|err| crate::ReaderError::Config(err.to_string()))
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_chars_per_location() -> usize {
    1024
}

fn default_font_size() -> u32 {
    16
}

fn default_lines_per_screen() -> usize {
    28
}

fn default_finished_threshold() -> f64 {
    0.99
}

fn default_relocation_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
