use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use clipstep_core::{
    Command, FileStateStore, HistoryEntry, Reader, ReaderConfig, ReaderEvent, ReaderSnapshot,
    SegmentationMode, StateStore, Status,
};
use clipstep_text::TextDocumentProvider;
use clipstep_tty::{write_status_line, DrawParams, EventMapper, InputMode, TextRenderer, UiEvent};
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod clipboard;

#[derive(Debug, Parser)]
#[command(
    name = "clipstep",
    version,
    about = "Step through a text file one paragraph or line at a time, copying each to the clipboard"
)]
struct Args {
    /// Unit to start on (0-based); overrides the remembered position
    #[arg(short = 'i', long = "index")]
    index: Option<usize>,

    /// Segmentation mode: paragraph or line
    #[arg(short = 'm', long = "mode")]
    mode: Option<SegmentationMode>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// List remembered documents and exit
    #[arg(long = "history")]
    history: bool,

    /// Text file to read; without one, clipstep starts in edit mode
    file: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "clipstep", "clipstep")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| ReaderConfig::default_path(&project_dirs));
    let config = ReaderConfig::load(&config_path)?;
    let history_dir = project_dirs.data_local_dir().join("history");
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(history_dir)?);

    if args.history {
        return print_history(store.as_ref(), &mut io::stdout());
    }

    let mut reader = Reader::new(&config, Arc::clone(&store), clipboard::open_backend())
        .with_context(|| format!("invalid configuration in {:?}", config_path))?;

    match &args.file {
        Some(path) => {
            reader
                .open_with(&TextDocumentProvider::new(), path, args.mode)
                .await
                .with_context(|| format!("failed to open {:?}", path))?;
            if let Some(index) = args.index {
                reader.apply(Command::JumpTo { index })?;
            }
        }
        None => reader.enter_edit()?,
    }

    run(&mut reader, config.poll_interval)?;

    if reader.status() != Status::Ready {
        if let Err(err) = reader.apply(Command::Complete) {
            warn!(%err, "failed to close reader cleanly");
        }
    }
    info!("exiting");
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn run(reader: &mut Reader, poll_interval: Duration) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = TextRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    if reader.status() == Status::Edit {
        event_mapper.set_mode(InputMode::Edit);
    }
    let events = reader.events();
    let mut dirty = true;

    renderer.clear_all()?;
    loop {
        if dirty {
            let pending = event_mapper.pending_input();
            redraw(&mut renderer, &reader.snapshot(), pending.as_deref())?;
            dirty = false;
        }

        if event::poll(poll_interval)? {
            let pending_before = event_mapper.pending_input();
            let ui_event = event_mapper.map_event(event::read()?);
            // Pending digits and prompts live on the status line.
            let prompt_changed = event_mapper.pending_input() != pending_before;
            match handle_event(ui_event, reader) {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => dirty |= prompt_changed,
                LoopAction::Quit => break,
            }
        }

        reader.tick(Instant::now());
        if drain_events(&events) {
            dirty = true;
        }
    }

    renderer.clear_all()?;
    Ok(())
}

fn handle_event(event: UiEvent, reader: &mut Reader) -> LoopAction {
    let command = match event {
        UiEvent::Quit => return LoopAction::Quit,
        UiEvent::None | UiEvent::BeginSearch => return LoopAction::Continue,
        UiEvent::EditChanged { .. } => return LoopAction::ContinueRedraw,
        UiEvent::SearchQueryChanged { query } | UiEvent::SearchSubmit { query } => {
            Command::Search { query }
        }
        UiEvent::SearchCancel => Command::Search {
            query: String::new(),
        },
        UiEvent::EditSubmit { text } => Command::EditText { text },
        UiEvent::Command(command) => command,
    };
    match reader.apply(command) {
        Ok(()) => LoopAction::ContinueRedraw,
        Err(err) => {
            debug!(%err, "command rejected");
            LoopAction::Continue
        }
    }
}

/// Logs drained reader events; returns whether any arrived.
fn drain_events(events: &Mutex<Vec<ReaderEvent>>) -> bool {
    let drained: Vec<_> = events.lock().drain(..).collect();
    for event in &drained {
        match event {
            ReaderEvent::ExternalClipboardChange => {
                info!("clipboard changed elsewhere; reading paused")
            }
            ReaderEvent::DocumentOpened(id) => info!(%id, "document opened"),
            ReaderEvent::DocumentClosed(id) => info!(%id, "document closed"),
            ReaderEvent::StateChanged(_) => {}
        }
    }
    !drained.is_empty()
}

fn redraw(
    renderer: &mut TextRenderer<io::Stdout>,
    snapshot: &ReaderSnapshot,
    pending_input: Option<&str>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    renderer.begin_sync_update()?;
    renderer.draw(snapshot, DrawParams::clamped(columns, rows))?;
    if let Some(status) = combine_status(Some(format_status(snapshot)), pending_input) {
        draw_status_line(renderer, rows, &status)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(renderer: &mut TextRenderer<io::Stdout>, rows: u16, status: &str) -> Result<()> {
    let status_row = rows.max(1) - 1;
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, status)?;
    Ok(())
}

fn format_status(snapshot: &ReaderSnapshot) -> String {
    match snapshot.status {
        Status::Edit => "EDIT | Enter copies the line, Esc quits".to_string(),
        Status::Ready | Status::Loading => snapshot.status.to_string(),
        Status::Process | Status::Pause => {
            let name = snapshot
                .file_path
                .as_ref()
                .and_then(|path| path.file_name())
                .and_then(|name| name.to_str())
                .unwrap_or("<unknown>");
            let position = if snapshot.total_units == 0 {
                "0/0".to_string()
            } else {
                format!("{}/{}", snapshot.current_index + 1, snapshot.total_units)
            };
            let mut status = format!("{} | {}", name, position);
            if let Some(page) = snapshot.page_info {
                status.push_str(&format!(" | p.{}", page));
            }
            if let Some(mode) = snapshot.mode {
                status.push_str(&format!(" | {}", mode));
            }
            if snapshot.is_paused {
                status.push_str(" | PAUSED (p resumes)");
            }
            if let Some(summary) = &snapshot.search {
                status.push_str(" | /");
                status.push_str(&summary.query);
                if summary.total == 0 {
                    status.push_str(" (no matches)");
                } else if let Some(index) = summary.current {
                    status.push_str(&format!(" ({}/{})", index + 1, summary.total));
                } else {
                    status.push_str(&format!(" (0/{})", summary.total));
                }
            }
            status
        }
    }
}

fn print_history<W: Write>(store: &dyn StateStore, out: &mut W) -> Result<()> {
    let entries = store.entries()?;
    if entries.is_empty() {
        writeln!(out, "no reading history")?;
        return Ok(());
    }
    let now = SystemTime::now();
    for entry in &entries {
        writeln!(out, "{}", format_history_entry(entry, now))?;
    }
    Ok(())
}

fn format_history_entry(entry: &HistoryEntry, now: SystemTime) -> String {
    let age = format_age(now.duration_since(entry.last_opened).unwrap_or_default());
    let mode = entry
        .mode
        .or(entry.position.as_ref().map(|record| record.mode))
        .map_or("-", SegmentationMode::as_str);
    let position = match &entry.position {
        Some(record) => match record.page_info {
            Some(page) => format!("#{} p.{}", record.current_index + 1, page),
            None => format!("#{}", record.current_index + 1),
        },
        None => "-".to_string(),
    };
    let path = entry
        .file_path
        .as_ref()
        .map_or_else(|| entry.fingerprint.to_string(), |path| path.display().to_string());
    format!("{:>8}  {:<9}  {:<12}  {}", age, mode, position, path)
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "clipstep.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal is in raw mode while reading, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipstep_core::{
        fingerprint_text, MemoryStateStore, PageInfo, PositionRecord, SearchSummary,
    };

    fn reading_snapshot() -> ReaderSnapshot {
        ReaderSnapshot {
            status: Status::Process,
            mode: Some(SegmentationMode::Paragraph),
            current_index: 4,
            total_units: 20,
            previous: None,
            current: None,
            next: None,
            page_info: Some(PageInfo::range(12, 13)),
            is_paused: false,
            file_path: Some(PathBuf::from("/books/novel.txt")),
            search: None,
            edit_text: None,
        }
    }

    #[test]
    fn status_shows_position_page_and_mode() {
        assert_eq!(
            format_status(&reading_snapshot()),
            "novel.txt | 5/20 | p.12-13 | paragraph"
        );
    }

    #[test]
    fn status_flags_pause_and_search() {
        let mut snapshot = reading_snapshot();
        snapshot.status = Status::Pause;
        snapshot.is_paused = true;
        snapshot.search = Some(SearchSummary {
            query: "storm".into(),
            total: 3,
            current: Some(1),
        });
        assert_eq!(
            format_status(&snapshot),
            "novel.txt | 5/20 | p.12-13 | paragraph | PAUSED (p resumes) | /storm (2/3)"
        );
    }

    #[test]
    fn pending_input_is_appended_to_status() {
        assert_eq!(
            combine_status(Some("base".into()), Some("12")).as_deref(),
            Some("base | 12")
        );
        assert_eq!(combine_status(Some("base".into()), Some("")).as_deref(), Some("base"));
        assert_eq!(combine_status(None, None), None);
    }

    #[test]
    fn ages_are_humanized() {
        assert_eq!(format_age(Duration::from_secs(5)), "just now");
        assert_eq!(format_age(Duration::from_secs(125)), "2m ago");
        assert_eq!(format_age(Duration::from_secs(7_300)), "2h ago");
        assert_eq!(format_age(Duration::from_secs(3 * 86_400)), "3d ago");
    }

    #[test]
    fn history_lists_entries_with_positions() {
        let store = MemoryStateStore::new();
        let fingerprint = fingerprint_text("book");
        let mut entry = HistoryEntry::new(fingerprint, Some(PathBuf::from("/books/novel.txt")));
        entry.position = Some(PositionRecord {
            fingerprint,
            current_index: 9,
            page_info: Some(PageInfo::single(4)),
            mode: SegmentationMode::Line,
            start_offset: 10,
            end_offset: 20,
            timestamp: SystemTime::now(),
        });
        store.save(&entry).unwrap();

        let mut out = Vec::new();
        print_history(&store, &mut out).unwrap();
        let listing = String::from_utf8(out).unwrap();
        assert!(listing.contains("just now"));
        assert!(listing.contains("line"));
        assert!(listing.contains("#10 p.4"));
        assert!(listing.contains("/books/novel.txt"));
    }

    #[test]
    fn empty_history_says_so() {
        let mut out = Vec::new();
        print_history(&MemoryStateStore::new(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "no reading history\n");
    }
}
