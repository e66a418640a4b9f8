//! Command-line front end for the folio reader.
//!
//! Opens one document, runs a sequence of reader commands against it and
//! prints the resulting session snapshot as JSON.

use anyhow::{Context, Result, anyhow, bail};
use folio_core::{
    Collaborators, DocumentId, ReaderConfig, ReadingSession, SessionHost, load_config,
};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const USAGE: &str = "Usage: folio-viewer <path-to-document> [command...]\n\
Commands: next, prev, jump <target>, percent <0-100>, font <size>, bookmark,\n\
          goto-bookmark <id>, delete-bookmark <id>, wait-index, wait-outline";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Next,
    Prev,
    Jump(String),
    Percent(f64),
    Font(u32),
    Bookmark,
    GotoBookmark(u64),
    DeleteBookmark(u64),
    WaitIndex,
    WaitOutline,
}

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let (path, commands) = parse_args(env::args().skip(1))?;
    let config = load_config(Path::new("conf/config.toml"));
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %path.display(),
        level = %config.log_level,
        cache = %config.cache_dir.display(),
        "Starting folio viewer"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(read(path, commands, config))
}

async fn read(path: PathBuf, commands: Vec<Command>, config: ReaderConfig) -> Result<()> {
    let id = DocumentId::new(path.to_string_lossy());
    let mut host = SessionHost::new(Collaborators::file_backed(&config), config);

    let opened = host.open(id).await.map(|_| ());
    if let Err(err) = opened {
        print_snapshot(&host)?;
        return Err(err).context("Failed to open document");
    }

    run_commands(&mut host, &commands).await?;
    print_snapshot(&host)
}

/// Apply `commands` in order. Failures other than load errors are contained
/// by the session, so they are logged and the next command still runs.
async fn run_commands(host: &mut SessionHost, commands: &[Command]) -> Result<()> {
    for command in commands {
        let session = host
            .active()
            .ok_or_else(|| anyhow!("no active session"))?;
        session.pump().await;
        if let Err(err) = apply(session, command).await {
            warn!(?command, category = err.category(), "Command failed: {err}");
        }
    }
    if let Some(session) = host.active() {
        session.pump().await;
    }
    Ok(())
}

async fn apply(session: &mut ReadingSession, command: &Command) -> folio_core::Result<()> {
    match command {
        Command::Next => session.next().await?,
        Command::Prev => session.prev().await?,
        Command::Jump(target) => {
            if !session.jump_to(target).await {
                warn!(%target, "Jump target not reachable");
            }
        }
        Command::Percent(percent) => {
            if !session.jump_to_percentage(percent / 100.0).await {
                warn!(percent, "Percentage jump not possible yet");
            }
        }
        Command::Font(size) => session.set_font_size(*size).await?,
        Command::Bookmark => {
            let bookmark = session.add_bookmark().await?;
            info!(id = bookmark.id, label = ?bookmark.label, "Bookmark added");
        }
        Command::GotoBookmark(id) => {
            if !session.jump_to_bookmark(*id).await {
                warn!(id, "Bookmark not found");
            }
        }
        Command::DeleteBookmark(id) => session.delete_bookmark(*id).await?,
        Command::WaitIndex => session.wait_for_index().await,
        Command::WaitOutline => session.wait_for_outline().await,
    }
    Ok(())
}

fn print_snapshot(host: &SessionHost) -> Result<()> {
    if let Some(snapshot) = host.snapshot() {
        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?;
        println!("{json}");
    }
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<(PathBuf, Vec<Command>)> {
    let mut args = args.into_iter();
    let path = args.next().ok_or_else(|| anyhow!(USAGE))?;
    let path = PathBuf::from(path);
    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.display()));
    }

    let mut commands = Vec::new();
    while let Some(word) = args.next() {
        let command = match word.as_str() {
            "next" => Command::Next,
            "prev" => Command::Prev,
            "bookmark" => Command::Bookmark,
            "wait-index" => Command::WaitIndex,
            "wait-outline" => Command::WaitOutline,
            "jump" => Command::Jump(value(&mut args, &word)?),
            "percent" => Command::Percent(parsed(&mut args, &word)?),
            "font" => Command::Font(parsed(&mut args, &word)?),
            "goto-bookmark" => Command::GotoBookmark(parsed(&mut args, &word)?),
            "delete-bookmark" => Command::DeleteBookmark(parsed(&mut args, &word)?),
            other => bail!("Unknown command {other:?}\n{USAGE}"),
        };
        commands.push(command);
    }
    Ok((path, commands))
}

fn value(args: &mut impl Iterator<Item = String>, command: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{command} needs an argument\n{USAGE}"))
}

fn parsed<T>(args: &mut impl Iterator<Item = String>, command: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value(args, command)?;
    raw.parse()
        .map_err(|err| anyhow!("Invalid argument {raw:?} for {command}: {err}"))
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; ignoring config.log_level");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
