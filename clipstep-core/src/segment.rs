use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::marker::{MarkerRules, PageInfo, PageMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    #[default]
    Paragraph,
    Line,
}

impl SegmentationMode {
    pub fn toggled(self) -> Self {
        match self {
            SegmentationMode::Paragraph => SegmentationMode::Line,
            SegmentationMode::Line => SegmentationMode::Paragraph,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentationMode::Paragraph => "paragraph",
            SegmentationMode::Line => "line",
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paragraph" | "para" | "p" => Ok(SegmentationMode::Paragraph),
            "line" | "l" => Ok(SegmentationMode::Line),
            other => Err(format!(
                "unknown segmentation mode `{other}` (expected `paragraph` or `line`)"
            )),
        }
    }
}

/// One addressable chunk of a document.
///
/// Offsets are UTF-8 byte offsets into the raw text the unit was cut from and
/// span the trimmed content, so `&raw[start_offset..end_offset]` is always a
/// valid slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub page_info: Option<PageInfo>,
}

impl Unit {
    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start_offset <= offset && offset <= self.end_offset
    }

    pub fn page(&self) -> Option<u32> {
        self.page_info.map(|info| info.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    pub mode: SegmentationMode,
    pub units: Vec<Unit>,
    pub last_page_info: Option<PageInfo>,
}

impl Segmentation {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub fn last_index(&self) -> usize {
        self.units.len().saturating_sub(1)
    }

    /// Smallest and largest page number observed on any unit.
    pub fn page_bounds(&self) -> Option<(u32, u32)> {
        let mut pages = self.units.iter().filter_map(Unit::page);
        let first = pages.next()?;
        Some(pages.fold((first, first), |(lo, hi), page| {
            (lo.min(page), hi.max(page))
        }))
    }
}

/// Line-length heuristic for documents without a remembered mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoDetect {
    pub min_long_lines: usize,
    pub long_line_chars: usize,
}

impl Default for AutoDetect {
    fn default() -> Self {
        Self {
            min_long_lines: 5,
            long_line_chars: 20,
        }
    }
}

impl AutoDetect {
    pub fn detect(&self, raw: &str) -> SegmentationMode {
        let long_lines = raw_lines(raw)
            .iter()
            .filter(|line| {
                line.text.chars().filter(|c| !c.is_whitespace()).count() > self.long_line_chars
            })
            .take(self.min_long_lines)
            .count();
        if long_lines >= self.min_long_lines {
            SegmentationMode::Line
        } else {
            SegmentationMode::Paragraph
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    rules: MarkerRules,
}

impl Segmenter {
    pub fn new(rules: MarkerRules) -> Self {
        Self { rules }
    }

    pub fn segment(&self, raw: &str, mode: SegmentationMode) -> Segmentation {
        let lines = raw_lines(raw);
        let (units, last_page_info) = match mode {
            SegmentationMode::Line => self.segment_lines(&lines),
            SegmentationMode::Paragraph => self.segment_paragraphs(&lines),
        };
        Segmentation {
            mode,
            units,
            last_page_info,
        }
    }

    fn segment_lines(&self, lines: &[RawLine<'_>]) -> (Vec<Unit>, Option<PageInfo>) {
        let mut units = Vec::new();
        let mut current_page = None;

        for line in lines.iter().filter(|line| !line.is_blank()) {
            match self.rules.classify(line.text) {
                PageMarker::Content => units.push(Unit {
                    index: units.len(),
                    text: line.text.to_string(),
                    start_offset: line.start,
                    end_offset: line.end,
                    page_info: current_page,
                }),
                PageMarker::Skip => {}
                marker => current_page = marker.page_info(),
            }
        }

        (units, current_page)
    }

    fn segment_paragraphs(&self, lines: &[RawLine<'_>]) -> (Vec<Unit>, Option<PageInfo>) {
        let mut units = Vec::new();
        let mut current_page = None;
        let mut paragraph: Option<ParagraphBuilder> = None;

        for line in lines {
            if line.is_blank() {
                if let Some(done) = paragraph.take() {
                    units.push(done.finish(units.len()));
                }
                continue;
            }
            // Markers inside a paragraph still move the page and are dropped
            // from the joined text.
            match self.rules.classify(line.text) {
                PageMarker::Content => paragraph
                    .get_or_insert_with(|| ParagraphBuilder::new(line.start, current_page))
                    .push(line),
                PageMarker::Skip => {}
                marker => current_page = marker.page_info(),
            }
        }
        if let Some(done) = paragraph.take() {
            units.push(done.finish(units.len()));
        }

        (units, current_page)
    }
}

struct ParagraphBuilder {
    start: usize,
    end: usize,
    text: String,
    page_info: Option<PageInfo>,
}

impl ParagraphBuilder {
    fn new(start: usize, page_info: Option<PageInfo>) -> Self {
        Self {
            start,
            end: start,
            text: String::new(),
            page_info,
        }
    }

    fn push(&mut self, line: &RawLine<'_>) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line.text);
        self.end = line.end;
    }

    fn finish(self, index: usize) -> Unit {
        Unit {
            index,
            text: self.text,
            start_offset: self.start,
            end_offset: self.end,
            page_info: self.page_info,
        }
    }
}

/// A physical line with its terminator removed and surrounding whitespace
/// trimmed; `start..end` addresses `text` inside the original buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawLine<'a> {
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
}

impl<'a> RawLine<'a> {
    fn new(raw: &'a str, start: usize, end: usize) -> Self {
        let slice = &raw[start..end];
        let leading = slice.len() - slice.trim_start().len();
        let text = slice.trim();
        Self {
            start: start + leading,
            end: start + leading + text.len(),
            text,
        }
    }

    fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

/// Splits on `\n`, `\r\n` and bare `\r` without copying the buffer.
pub(crate) fn raw_lines(raw: &str) -> Vec<RawLine<'_>> {
    let bytes = raw.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\n' => {
                lines.push(RawLine::new(raw, start, pos));
                pos += 1;
                start = pos;
            }
            b'\r' => {
                lines.push(RawLine::new(raw, start, pos));
                pos += if bytes.get(pos + 1) == Some(&b'\n') { 2 } else { 1 };
                start = pos;
            }
            _ => pos += 1,
        }
    }
    if start < bytes.len() {
        lines.push(RawLine::new(raw, start, bytes.len()));
    }

    lines
}
