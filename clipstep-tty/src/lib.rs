use std::io::{self, Write};

use anyhow::Result;
use clipstep_core::{Command, ReaderSnapshot, Status};
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use unicode_width::UnicodeWidthChar;

pub struct TextRenderer<W: Write> {
    writer: W,
}

pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    /// Rows left for text once the status line is reserved.
    fn body_rows(&self) -> usize {
        usize::from(self.rows.saturating_sub(1).max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStyle {
    Dim,
    Bold,
    Plain,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Draws the previous, current and next units, current one in bold.
    pub fn draw(&mut self, snapshot: &ReaderSnapshot, params: DrawParams) -> Result<()> {
        let lines = layout(snapshot, &params);
        for (row, (style, text)) in lines.iter().enumerate() {
            let attribute = match style {
                LineStyle::Dim => Attribute::Dim,
                LineStyle::Bold => Attribute::Bold,
                LineStyle::Plain => Attribute::Reset,
            };
            crossterm::queue!(
                &mut self.writer,
                cursor::MoveTo(0, row as u16),
                Clear(ClearType::CurrentLine),
                SetAttribute(attribute),
                Print(text),
                SetAttribute(Attribute::Reset)
            )?;
        }
        for row in lines.len()..params.body_rows() {
            crossterm::queue!(
                &mut self.writer,
                cursor::MoveTo(0, row as u16),
                Clear(ClearType::CurrentLine)
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn layout(snapshot: &ReaderSnapshot, params: &DrawParams) -> Vec<(LineStyle, String)> {
    let width = usize::from(params.columns);
    let rows = params.body_rows();

    let current_text = match snapshot.status {
        Status::Edit => snapshot.edit_text.clone().unwrap_or_default(),
        Status::Loading => "Loading...".to_string(),
        _ => match &snapshot.current {
            Some(unit) => unit.text.clone(),
            None if snapshot.mode.is_some() => "(this document has no readable text)".to_string(),
            None => String::new(),
        },
    };
    let mut current = wrap_text(&current_text, width);
    current.truncate(rows);

    // Split what is left between the neighbours, one blank separator each.
    let spare = rows - current.len();
    let before_budget = (spare / 2).saturating_sub(1);
    let after_budget = (spare - spare / 2).saturating_sub(1);

    let mut lines = Vec::with_capacity(rows);
    if let Some(previous) = snapshot.previous.as_ref().filter(|_| before_budget > 0) {
        let wrapped = wrap_text(&previous.text, width);
        let skip = wrapped.len().saturating_sub(before_budget);
        lines.extend(wrapped.into_iter().skip(skip).map(|l| (LineStyle::Dim, l)));
        lines.push((LineStyle::Plain, String::new()));
    }
    lines.extend(current.into_iter().map(|l| (LineStyle::Bold, l)));
    if let Some(next) = snapshot.next.as_ref().filter(|_| after_budget > 0) {
        lines.push((LineStyle::Plain, String::new()));
        lines.extend(
            wrap_text(&next.text, width)
                .into_iter()
                .take(after_budget)
                .map(|l| (LineStyle::Dim, l)),
        );
    }
    lines
}

/// Hard-wraps `text` at `width` terminal columns, keeping explicit line breaks.
/// A glyph wider than `width` gets a row of its own.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for line in text.split('\n') {
        let mut row = String::new();
        let mut used = 0;
        for c in line.chars() {
            let w = c.width().unwrap_or(0);
            if used + w > width && !row.is_empty() {
                out.push(std::mem::take(&mut row));
                used = 0;
            }
            row.push(c);
            used += w;
        }
        out.push(row);
    }
    out
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    BeginSearch,
    SearchQueryChanged { query: String },
    SearchSubmit { query: String },
    SearchCancel,
    EditChanged { text: String },
    EditSubmit { text: String },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
    Edit,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    search_buffer: String,
    edit_buffer: String,
}

fn is_plain(modifiers: KeyModifiers) -> bool {
    modifiers.is_empty() || modifiers == KeyModifiers::SHIFT
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.search_buffer.clear();
            self.edit_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let key = match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => key,
            _ => return UiEvent::None,
        };
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return UiEvent::Quit;
        }
        match self.mode {
            InputMode::Normal => self.map_key_normal(key),
            InputMode::Search => self.map_key_search(key),
            InputMode::Edit => self.map_key_edit(key),
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char(' '), _)
            | (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::Advance { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::Retreat { count })
            }
            (KeyCode::Char('J'), m) if is_plain(m) => {
                self.reset_count();
                UiEvent::Command(Command::AdvancePage)
            }
            (KeyCode::PageDown, _) => {
                self.reset_count();
                UiEvent::Command(Command::AdvancePage)
            }
            (KeyCode::Char('K'), m) if is_plain(m) => {
                self.reset_count();
                UiEvent::Command(Command::RetreatPage)
            }
            (KeyCode::PageUp, _) => {
                self.reset_count();
                UiEvent::Command(Command::RetreatPage)
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let index = self.take_index().unwrap_or(0);
                UiEvent::Command(Command::JumpTo { index })
            }
            (KeyCode::Char('G'), m) if is_plain(m) => {
                let index = self.take_index().unwrap_or(usize::MAX);
                UiEvent::Command(Command::JumpTo { index })
            }
            (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::Command(Command::JumpTo { index: usize::MAX })
            }
            (KeyCode::Enter, _) => match self.take_index() {
                Some(index) => UiEvent::Command(Command::JumpTo { index }),
                None => UiEvent::None,
            },
            (KeyCode::Char('p'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::TogglePause)
            }
            (KeyCode::Char('m'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::ToggleMode)
            }
            (KeyCode::Char('/'), _) => {
                self.set_mode(InputMode::Search);
                UiEvent::BeginSearch
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::SearchNext { count })
            }
            (KeyCode::Char('N'), m) if is_plain(m) => {
                let count = self.take_count();
                UiEvent::Command(Command::SearchPrev { count })
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_search(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::SearchCancel
            }
            (KeyCode::Enter, _) => {
                let query = self.search_buffer.clone();
                self.set_mode(InputMode::Normal);
                UiEvent::SearchSubmit { query }
            }
            (KeyCode::Backspace, _) => {
                self.search_buffer.pop();
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if is_plain(mods) => {
                self.search_buffer.push(c);
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    /// Free-text authoring: Enter copies the buffer, Esc leaves.
    fn map_key_edit(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => UiEvent::Quit,
            (KeyCode::Enter, _) => UiEvent::EditSubmit {
                text: std::mem::take(&mut self.edit_buffer),
            },
            (KeyCode::Backspace, _) => {
                self.edit_buffer.pop();
                UiEvent::EditChanged {
                    text: self.edit_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if is_plain(mods) => {
                self.edit_buffer.push(c);
                UiEvent::EditChanged {
                    text: self.edit_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    /// Pending count read as a 1-based unit number.
    fn take_index(&mut self) -> Option<usize> {
        let index = self
            .pending_count
            .take()
            .map(|count| count.saturating_sub(1));
        self.pending_digits.clear();
        index
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.search_buffer)),
            InputMode::Edit => Some(format!("> {}", self.edit_buffer)),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipstep_core::{PageInfo, SegmentationMode, Unit};
    use crossterm::event::KeyEventState;
    use unicode_width::UnicodeWidthStr;

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn unit(index: usize, text: &str) -> Unit {
        Unit {
            index,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            page_info: Some(PageInfo::single(3)),
        }
    }

    fn snapshot() -> ReaderSnapshot {
        ReaderSnapshot {
            status: Status::Process,
            mode: Some(SegmentationMode::Line),
            current_index: 1,
            total_units: 3,
            previous: Some(unit(0, "before")),
            current: Some(unit(1, "the current line")),
            next: Some(unit(2, "after")),
            page_info: Some(PageInfo::single(3)),
            is_paused: false,
            file_path: None,
            search: None,
            edit_text: None,
        }
    }

    #[test]
    fn event_mapper_uses_numeric_prefix_for_advance() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('1'))),
            UiEvent::None
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('2'))),
            UiEvent::None
        ));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::Command(Command::Advance { count }) => assert_eq!(count, 12),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_resets_prefix_after_use() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('3')));

        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            UiEvent::Command(Command::Retreat { count }) => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event(KeyCode::Up)) {
            UiEvent::Command(Command::Retreat { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_drops_prefix_on_other_command() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('p'))),
            UiEvent::Command(Command::TogglePause)
        ));

        match mapper.map_event(key_event(KeyCode::Char(' '))) {
            UiEvent::Command(Command::Advance { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_count_with_g_or_enter_jumps_to_unit() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('1')));
        mapper.map_event(key_event(KeyCode::Char('5')));
        assert_eq!(mapper.pending_input().as_deref(), Some("15"));

        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::Command(Command::JumpTo { index }) => assert_eq!(index, 14),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::None
        ));

        mapper.map_event(key_event(KeyCode::Char('7')));
        match mapper.map_event(key_event(KeyCode::Char('g'))) {
            UiEvent::Command(Command::JumpTo { index }) => assert_eq!(index, 6),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_g_and_shift_g_go_to_edges() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(key_event(KeyCode::Char('g'))) {
            UiEvent::Command(Command::JumpTo { index }) => assert_eq!(index, 0),
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::JumpTo { index }) => assert_eq!(index, usize::MAX),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_maps_page_keys() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('J'),
                KeyModifiers::SHIFT
            )),
            UiEvent::Command(Command::AdvancePage)
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::PageUp)),
            UiEvent::Command(Command::RetreatPage)
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('m'))),
            UiEvent::Command(Command::ToggleMode)
        ));
    }

    #[test]
    fn event_mapper_maps_n_and_uppercase_n_to_search_navigation() {
        let mut mapper = EventMapper::new();

        match mapper.map_event(key_event(KeyCode::Char('n'))) {
            UiEvent::Command(Command::SearchNext { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('N'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::SearchPrev { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }

        mapper.map_event(key_event(KeyCode::Char('3')));
        match mapper.map_event(key_event(KeyCode::Char('n'))) {
            UiEvent::Command(Command::SearchNext { count }) => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_slash_enters_search_mode_and_collects_input() {
        let mut mapper = EventMapper::new();

        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('/'))),
            UiEvent::BeginSearch
        ));
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        match mapper.map_event(key_event(KeyCode::Char('q'))) {
            UiEvent::SearchQueryChanged { ref query } => assert_eq!(query, "q"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("/q"));

        match mapper.map_event(key_event(KeyCode::Backspace)) {
            UiEvent::SearchQueryChanged { ref query } => assert!(query.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        mapper.map_event(key_event(KeyCode::Char('z')));
        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::SearchSubmit { ref query } => assert_eq!(query, "z"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn event_mapper_escape_cancels_search() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('/')));
        mapper.map_event(key_event(KeyCode::Char('x')));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::SearchCancel
        ));
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn event_mapper_edit_mode_collects_and_submits_text() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Edit);
        for c in "hi j".chars() {
            mapper.map_event(key_event(KeyCode::Char(c)));
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("> hi j"));

        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::EditSubmit { ref text } => assert_eq!(text, "hi j"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(mapper.pending_input().as_deref(), Some("> "));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::Quit
        ));
    }

    #[test]
    fn event_mapper_ctrl_c_always_quits() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Search);
        assert!(matches!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL
            )),
            UiEvent::Quit
        ));
    }

    #[test]
    fn event_mapper_ignores_key_release() {
        let mut mapper = EventMapper::new();
        let release = Event::Key(KeyEvent {
            code: KeyCode::Char('j'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        assert!(matches!(mapper.map_event(release), UiEvent::None));
    }

    #[test]
    fn wrap_text_splits_long_lines_and_keeps_breaks() {
        assert_eq!(wrap_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap_text("ab\n\ncd", 10), vec!["ab", "", "cd"]);
        assert_eq!(wrap_text("가나다라", 5), vec!["가나", "다라"]);
        assert_eq!(wrap_text("ab가c", 3), vec!["ab", "가c"]);
        assert_eq!(wrap_text("가", 1), vec!["가"]);
        for row in wrap_text("12쪽 본문은 여기에서 시작합니다", 7) {
            assert!(row.width() <= 7, "{row:?} overflows");
        }
    }

    #[test]
    fn layout_puts_current_unit_between_neighbours() {
        let lines = layout(&snapshot(), &DrawParams::clamped(40, 10));
        let texts: Vec<_> = lines.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["before", "", "the current line", "", "after"]);
        assert_eq!(lines[2].0, LineStyle::Bold);
        assert_eq!(lines[0].0, LineStyle::Dim);
    }

    #[test]
    fn layout_drops_neighbours_when_space_is_short() {
        let lines = layout(&snapshot(), &DrawParams::clamped(8, 3));
        let texts: Vec<_> = lines.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["the curr", "ent line"]);
    }

    #[test]
    fn draw_emits_bold_current_unit() {
        let mut renderer = TextRenderer::new(Vec::new());
        renderer
            .draw(&snapshot(), DrawParams::clamped(40, 10))
            .unwrap();
        let output = String::from_utf8(renderer.writer).unwrap();
        assert!(output.contains("the current line"));
        assert!(output.contains("\u{1b}[1m"));
    }
}
