//! The reading state machine.
//!
//! [`Reader`] owns the only live navigation state. Presentation code drives it
//! through [`Reader::apply`] and [`Reader::tick`] and observes it through
//! [`Reader::snapshot`] or the [`ReaderEvent`] queue.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clipboard::{ClipboardBackend, ClipboardChange, ClipboardSyncGuard};
use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::mapping::{find_span, map_position};
use crate::marker::PageInfo;
use crate::segment::{AutoDetect, Segmentation, SegmentationMode, Segmenter, Unit};
use crate::store::{Fingerprint, HistoryEntry, PositionRecord, StateStore};
use crate::{DocumentProvider, TextDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ready,
    Loading,
    Process,
    Pause,
    Edit,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Ready,
        Status::Loading,
        Status::Process,
        Status::Pause,
        Status::Edit,
    ];

    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Ready, Loading)
                | (Ready, Edit)
                | (Loading, Process)
                | (Loading, Ready)
                | (Process, Pause)
                | (Process, Ready)
                | (Pause, Process)
                | (Pause, Ready)
                | (Edit, Ready)
        )
    }

    pub fn is_reading(self) -> bool {
        matches!(self, Status::Process | Status::Pause)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ready => "READY",
            Status::Loading => "LOADING",
            Status::Process => "PROCESS",
            Status::Pause => "PAUSE",
            Status::Edit => "EDIT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Advance { count: usize },
    Retreat { count: usize },
    AdvancePage,
    RetreatPage,
    JumpTo { index: usize },
    SwitchMode { mode: SegmentationMode },
    ToggleMode,
    Pause,
    Resume,
    TogglePause,
    Complete,
    Search { query: String },
    SearchNext { count: usize },
    SearchPrev { count: usize },
    EditText { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub query: String,
    pub total: usize,
    pub current: Option<usize>,
}

/// Read-only view handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSnapshot {
    pub status: Status,
    pub mode: Option<SegmentationMode>,
    pub current_index: usize,
    pub total_units: usize,
    pub previous: Option<Unit>,
    pub current: Option<Unit>,
    pub next: Option<Unit>,
    pub page_info: Option<PageInfo>,
    pub is_paused: bool,
    pub file_path: Option<PathBuf>,
    pub search: Option<SearchSummary>,
    pub edit_text: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ReaderEvent {
    DocumentOpened(Fingerprint),
    DocumentClosed(Fingerprint),
    ExternalClipboardChange,
    StateChanged(ReaderSnapshot),
}

struct SearchState {
    query: String,
    matches: Vec<usize>,
    current: Option<usize>,
}

impl SearchState {
    fn run(query: &str, units: &[Unit]) -> Self {
        let needle = query.to_lowercase();
        let matches = units
            .iter()
            .filter(|unit| unit.text.to_lowercase().contains(&needle))
            .map(|unit| unit.index)
            .collect();
        Self {
            query: query.to_string(),
            matches,
            current: None,
        }
    }

    /// Selects the first match at or after `from`, wrapping to the start.
    fn select_from(&mut self, from: usize) -> Option<usize> {
        if self.matches.is_empty() {
            self.current = None;
            return None;
        }
        let slot = self
            .matches
            .iter()
            .position(|&index| index >= from)
            .unwrap_or(0);
        self.current = Some(slot);
        Some(self.matches[slot])
    }

    fn step(&mut self, forward: bool, count: usize) -> Option<usize> {
        if self.matches.is_empty() {
            return None;
        }
        let len = self.matches.len();
        let shift = count % len;
        let slot = match self.current {
            Some(slot) if forward => (slot + shift) % len,
            Some(slot) => (slot + len - shift) % len,
            None if forward => 0,
            None => len - 1,
        };
        self.current = Some(slot);
        Some(self.matches[slot])
    }

    fn summary(&self) -> SearchSummary {
        SearchSummary {
            query: self.query.clone(),
            total: self.matches.len(),
            current: self.current,
        }
    }
}

struct ActiveDocument {
    document: TextDocument,
    segmentation: Segmentation,
    current: usize,
    search: Option<SearchState>,
    unsaved_since: Option<Instant>,
}

impl ActiveDocument {
    fn current_unit(&self) -> Option<&Unit> {
        self.segmentation.get(self.current)
    }
}

pub struct Reader {
    status: Status,
    active: Option<ActiveDocument>,
    edit_buffer: String,
    segmenter: Segmenter,
    auto_detect: AutoDetect,
    default_mode: Option<SegmentationMode>,
    persist_debounce: Duration,
    store: Arc<dyn StateStore>,
    clipboard: ClipboardSyncGuard,
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl Reader {
    pub fn new(
        config: &ReaderConfig,
        store: Arc<dyn StateStore>,
        clipboard: Box<dyn ClipboardBackend>,
    ) -> Result<Self, ReaderError> {
        Ok(Self {
            status: Status::Ready,
            active: None,
            edit_buffer: String::new(),
            segmenter: config.segmenter()?,
            auto_detect: config.auto_detect,
            default_mode: config.default_mode,
            persist_debounce: config.persist_debounce,
            store,
            clipboard: ClipboardSyncGuard::new(clipboard),
            events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ReaderEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.status == Status::Pause
    }

    pub fn units(&self) -> &[Unit] {
        self.active
            .as_ref()
            .map(|active| active.segmentation.units.as_slice())
            .unwrap_or_default()
    }

    pub fn current_index(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.current)
    }

    pub fn current_unit(&self) -> Option<&Unit> {
        self.active.as_ref().and_then(ActiveDocument::current_unit)
    }

    pub fn mode(&self) -> Option<SegmentationMode> {
        self.active
            .as_ref()
            .map(|active| active.segmentation.mode)
    }

    pub fn document(&self) -> Option<&TextDocument> {
        self.active.as_ref().map(|active| &active.document)
    }

    pub fn snapshot(&self) -> ReaderSnapshot {
        let active = self.active.as_ref();
        let units = self.units();
        let current_index = self.current_index();
        let current = units.get(current_index).cloned();
        ReaderSnapshot {
            status: self.status,
            mode: self.mode(),
            current_index,
            total_units: units.len(),
            previous: current_index
                .checked_sub(1)
                .and_then(|index| units.get(index))
                .cloned(),
            page_info: current.as_ref().and_then(|unit| unit.page_info),
            current,
            next: units.get(current_index + 1).cloned(),
            is_paused: self.is_paused(),
            file_path: active.and_then(|active| active.document.path.clone()),
            search: active
                .and_then(|active| active.search.as_ref())
                .map(SearchState::summary),
            edit_text: (self.status == Status::Edit).then(|| self.edit_buffer.clone()),
        }
    }

    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider>(
        &mut self,
        provider: &P,
        path: &Path,
        mode: Option<SegmentationMode>,
    ) -> Result<()> {
        self.begin_loading()?;
        match provider.open(path).await {
            Ok(document) => {
                self.finish_loading(document, mode)?;
                Ok(())
            }
            Err(err) => {
                self.abort_loading()?;
                Err(err)
            }
        }
    }

    /// Segments `document`, restores its remembered position and starts
    /// reading. `mode` overrides every remembered or detected mode.
    pub fn open(
        &mut self,
        document: TextDocument,
        mode: Option<SegmentationMode>,
    ) -> Result<&[Unit], ReaderError> {
        self.begin_loading()?;
        self.finish_loading(document, mode)?;
        Ok(self.units())
    }

    pub fn begin_loading(&mut self) -> Result<(), ReaderError> {
        self.transition(Status::Loading)?;
        self.publish();
        Ok(())
    }

    pub fn abort_loading(&mut self) -> Result<(), ReaderError> {
        self.require(Status::Loading, Status::Ready)?;
        self.transition(Status::Ready)?;
        self.publish();
        Ok(())
    }

    pub fn finish_loading(
        &mut self,
        document: TextDocument,
        mode: Option<SegmentationMode>,
    ) -> Result<(), ReaderError> {
        self.require(Status::Loading, Status::Process)?;

        let mut entry = match self.store.load(&document.fingerprint) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(?err, "failed to load reading history");
                None
            }
        }
        .unwrap_or_else(|| HistoryEntry::new(document.fingerprint, document.path.clone()));

        let mode = mode
            .or(entry.mode)
            .or(self.default_mode)
            .unwrap_or_else(|| self.auto_detect.detect(&document.text));
        let segmentation = self.segmenter.segment(&document.text, mode);
        let current = entry
            .position
            .as_ref()
            .filter(|record| record.fingerprint == document.fingerprint)
            .map_or(0, |record| self.restore_index(&document.text, &segmentation, record));

        info!(
            fingerprint = %document.fingerprint,
            %mode,
            units = segmentation.len(),
            current,
            "document opened"
        );

        entry.file_path = document.path.clone().or(entry.file_path);
        entry.last_opened = SystemTime::now();
        if let Err(err) = self.store.save(&entry) {
            warn!(?err, "failed to record document in history");
        }

        let fingerprint = document.fingerprint;
        self.active = Some(ActiveDocument {
            document,
            segmentation,
            current,
            search: None,
            unsaved_since: None,
        });
        self.transition(Status::Process)?;
        self.events
            .lock()
            .push(ReaderEvent::DocumentOpened(fingerprint));
        self.sync_current(Instant::now());
        self.publish();
        Ok(())
    }

    /// Starts free-text authoring. Only legal with no document open.
    pub fn enter_edit(&mut self) -> Result<(), ReaderError> {
        self.transition(Status::Edit)?;
        self.edit_buffer.clear();
        self.publish();
        Ok(())
    }

    pub fn apply(&mut self, command: Command) -> Result<(), ReaderError> {
        self.apply_at(command, Instant::now())
    }

    /// Single mutation entry point; `now` stamps clipboard writes and history
    /// debouncing.
    pub fn apply_at(&mut self, command: Command, now: Instant) -> Result<(), ReaderError> {
        match command {
            Command::Advance { count } => self.step(true, count.max(1), now),
            Command::Retreat { count } => self.step(false, count.max(1), now),
            Command::AdvancePage => self.move_by_page(true, now),
            Command::RetreatPage => self.move_by_page(false, now),
            Command::JumpTo { index } => self.jump_to(index, now),
            Command::SwitchMode { mode } => self.switch_mode(mode, now),
            Command::ToggleMode => {
                self.require_reading()?;
                let mode = self.mode().unwrap_or_default().toggled();
                self.switch_mode(mode, now)
            }
            Command::Pause => self.pause(),
            Command::Resume => self.resume(now),
            Command::TogglePause => {
                if self.is_paused() {
                    self.resume(now)
                } else {
                    self.pause()
                }
            }
            Command::Complete => self.complete(),
            Command::Search { query } => self.search(query, now),
            Command::SearchNext { count } => self.search_step(true, count.max(1), now),
            Command::SearchPrev { count } => self.search_step(false, count.max(1), now),
            Command::EditText { text } => self.edit_text(text, now),
        }
    }

    /// Periodic entry point: polls the clipboard once and flushes a due
    /// history write.
    pub fn tick(&mut self, now: Instant) {
        if let Some((_, change)) = self.clipboard.poll(now) {
            self.on_clipboard_changed(change);
        }
        self.flush_history_if_due(now);
    }

    fn on_clipboard_changed(&mut self, change: ClipboardChange) {
        if self.status != Status::Process {
            debug!(status = %self.status, ?change, "clipboard change ignored");
            return;
        }
        match change {
            ClipboardChange::Internal => debug!("clipboard echo of our own write"),
            ClipboardChange::External => {
                info!("external clipboard change; pausing");
                self.events.lock().push(ReaderEvent::ExternalClipboardChange);
                if self.transition(Status::Pause).is_ok() {
                    self.publish();
                }
            }
        }
    }

    fn transition(&mut self, to: Status) -> Result<(), ReaderError> {
        if !self.status.can_transition_to(to) {
            return Err(ReaderError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        debug!(from = %self.status, %to, "status transition");
        self.status = to;
        Ok(())
    }

    fn require(&self, expected: Status, to: Status) -> Result<(), ReaderError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ReaderError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    fn require_reading(&self) -> Result<(), ReaderError> {
        if self.status.is_reading() && self.active.is_some() {
            Ok(())
        } else {
            Err(ReaderError::InvalidTransition {
                from: self.status,
                to: Status::Process,
            })
        }
    }

    fn step(&mut self, forward: bool, count: usize, now: Instant) -> Result<(), ReaderError> {
        self.require_reading()?;
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        let target = if forward {
            active
                .current
                .saturating_add(count)
                .min(active.segmentation.last_index())
        } else {
            active.current.saturating_sub(count)
        };
        if active.segmentation.is_empty() || target == active.current {
            return Ok(());
        }
        self.move_to(target, now)
    }

    fn jump_to(&mut self, index: usize, now: Instant) -> Result<(), ReaderError> {
        self.require_reading()?;
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        if active.segmentation.is_empty() {
            return Ok(());
        }
        let target = index.min(active.segmentation.last_index());
        if target != index {
            debug!(index, target, "jump target clamped");
        }
        self.move_to(target, now)
    }

    fn move_by_page(&mut self, forward: bool, now: Instant) -> Result<(), ReaderError> {
        self.require_reading()?;
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        if active.segmentation.is_empty() {
            return Ok(());
        }
        let target = page_target(&active.segmentation, active.current, forward);
        if target == active.current {
            return Ok(());
        }
        self.move_to(target, now)
    }

    /// Shared post-conditions of every positional move: resume, persist
    /// later, copy the new unit.
    fn move_to(&mut self, target: usize, now: Instant) -> Result<(), ReaderError> {
        if self.status == Status::Pause {
            self.transition(Status::Process)?;
        }
        if let Some(active) = self.active.as_mut() {
            active.current = target;
            active.unsaved_since.get_or_insert(now);
        }
        self.sync_current(now);
        self.publish();
        Ok(())
    }

    fn switch_mode(&mut self, mode: SegmentationMode, now: Instant) -> Result<(), ReaderError> {
        self.require_reading()?;
        let segmenter = &self.segmenter;
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let old_mode = active.segmentation.mode;
        if old_mode == mode {
            return Ok(());
        }

        let segmentation = segmenter.segment(&active.document.text, mode);
        let current = map_position(
            active.current,
            &active.segmentation.units,
            &segmentation.units,
            old_mode,
            mode,
        );
        debug!(from = %old_mode, to = %mode, old = active.current, new = current, "mode switched");
        active.segmentation = segmentation;
        active.current = current;
        active.unsaved_since.get_or_insert(now);
        if let Some(search) = active.search.as_mut() {
            *search = SearchState::run(&search.query, &active.segmentation.units);
            search.select_from(current);
        }

        self.remember_mode(mode);
        if self.status == Status::Process {
            self.sync_current(now);
        }
        self.publish();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), ReaderError> {
        self.transition(Status::Pause)?;
        self.publish();
        Ok(())
    }

    fn resume(&mut self, now: Instant) -> Result<(), ReaderError> {
        self.require(Status::Pause, Status::Process)?;
        self.transition(Status::Process)?;
        self.sync_current(now);
        self.publish();
        Ok(())
    }

    fn complete(&mut self) -> Result<(), ReaderError> {
        if !self.status.can_transition_to(Status::Ready) {
            return Err(ReaderError::InvalidTransition {
                from: self.status,
                to: Status::Ready,
            });
        }
        self.persist_position();
        self.transition(Status::Ready)?;
        self.edit_buffer.clear();
        if let Some(active) = self.active.take() {
            self.events
                .lock()
                .push(ReaderEvent::DocumentClosed(active.document.fingerprint));
        }
        self.publish();
        Ok(())
    }

    fn search(&mut self, query: String, now: Instant) -> Result<(), ReaderError> {
        self.require_reading()?;
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if query.trim().is_empty() {
            active.search = None;
            self.publish();
            return Ok(());
        }
        let mut search = SearchState::run(&query, &active.segmentation.units);
        let hit = search.select_from(active.current);
        debug!(query = %query, matches = search.matches.len(), "search");
        active.search = Some(search);
        match hit {
            Some(index) => self.move_to(index, now),
            None => {
                self.publish();
                Ok(())
            }
        }
    }

    fn search_step(
        &mut self,
        forward: bool,
        count: usize,
        now: Instant,
    ) -> Result<(), ReaderError> {
        self.require_reading()?;
        let hit = self
            .active
            .as_mut()
            .and_then(|active| active.search.as_mut())
            .and_then(|search| search.step(forward, count));
        match hit {
            Some(index) => self.move_to(index, now),
            None => Ok(()),
        }
    }

    fn edit_text(&mut self, text: String, now: Instant) -> Result<(), ReaderError> {
        self.require(Status::Edit, Status::Edit)?;
        self.clipboard.write(&text, now);
        self.edit_buffer = text;
        self.publish();
        Ok(())
    }

    fn sync_current(&mut self, now: Instant) {
        let Some(text) = self.current_unit().map(|unit| unit.text.clone()) else {
            return;
        };
        self.clipboard.write(&text, now);
    }

    fn restore_index(
        &self,
        text: &str,
        segmentation: &Segmentation,
        record: &PositionRecord,
    ) -> usize {
        if segmentation.is_empty() {
            return 0;
        }
        if record.mode == segmentation.mode {
            return locate(&segmentation.units, record);
        }
        let saved = self.segmenter.segment(text, record.mode);
        let index = locate(&saved.units, record);
        map_position(
            index,
            &saved.units,
            &segmentation.units,
            record.mode,
            segmentation.mode,
        )
    }

    fn remember_mode(&self, mode: SegmentationMode) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let document = &active.document;
        let result = self.store.load(&document.fingerprint).and_then(|entry| {
            let mut entry = entry
                .unwrap_or_else(|| HistoryEntry::new(document.fingerprint, document.path.clone()));
            entry.mode = Some(mode);
            self.store.save(&entry)
        });
        if let Err(err) = result {
            warn!(?err, "failed to remember segmentation mode");
        }
    }

    fn flush_history_if_due(&mut self, now: Instant) {
        let due = self
            .active
            .as_ref()
            .and_then(|active| active.unsaved_since)
            .is_some_and(|since| now.saturating_duration_since(since) >= self.persist_debounce);
        if due {
            self.persist_position();
        }
    }

    /// Writes the current position to the history store. Failures are logged
    /// and otherwise ignored.
    pub fn persist_position(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.unsaved_since = None;
        let Some(unit) = active.current_unit() else {
            return;
        };
        let document = &active.document;
        let record =
            PositionRecord::for_unit(document.fingerprint, active.segmentation.mode, unit);
        let result = self.store.load(&document.fingerprint).and_then(|entry| {
            let mut entry = entry
                .unwrap_or_else(|| HistoryEntry::new(document.fingerprint, document.path.clone()));
            entry.position = Some(record);
            self.store.save(&entry)
        });
        match result {
            Ok(()) => debug!(index = active.current, "position saved"),
            Err(err) => warn!(?err, "failed to save reading position"),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.events.lock().push(ReaderEvent::StateChanged(snapshot));
    }
}

fn locate(units: &[Unit], record: &PositionRecord) -> usize {
    find_span(units, record.start_offset, record.end_offset)
        .unwrap_or_else(|| record.current_index.min(units.len().saturating_sub(1)))
}

/// Index of the first unit on the nearest populated page in the given
/// direction, or the first/last unit when no such page exists.
fn page_target(segmentation: &Segmentation, current: usize, forward: bool) -> usize {
    let units = &segmentation.units;
    let edge = if forward { segmentation.last_index() } else { 0 };
    let Some((min_page, max_page)) = segmentation.page_bounds() else {
        debug!("no page markers; jumping to document edge");
        return edge;
    };
    let Some(page) = units.get(current).and_then(Unit::page) else {
        return if forward {
            units
                .iter()
                .skip(current + 1)
                .find(|unit| unit.page_info.is_some())
                .map_or(edge, |unit| unit.index)
        } else {
            edge
        };
    };

    let mut candidate = page;
    loop {
        if forward {
            if candidate >= max_page {
                break;
            }
            candidate += 1;
        } else {
            if candidate <= min_page {
                break;
            }
            candidate -= 1;
        }
        if let Some(unit) = units.iter().find(|unit| unit.page() == Some(candidate)) {
            return unit.index;
        }
    }
    debug!(page, forward, "no populated page beyond current; jumping to edge");
    edge
}
