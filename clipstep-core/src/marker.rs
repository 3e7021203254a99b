//! Page-number and separator recognition.
//!
//! A line is classified by an ordered list of [`MarkerRule`]s. Range rules are
//! always tried before single-page rules, which are tried before skip rules, so
//! `12-13` never degrades to page `12`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReaderError;

/// Page span attached to a unit. `start == end` for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageInfo {
    pub start: u32,
    pub end: u32,
}

impl PageInfo {
    pub fn single(page: u32) -> Self {
        Self {
            start: page,
            end: page,
        }
    }

    /// Builds a span from two page numbers in either order.
    pub fn range(first: u32, second: u32) -> Self {
        Self {
            start: first.min(second),
            end: first.max(second),
        }
    }

    pub fn is_range(&self) -> bool {
        self.start < self.end
    }
}

impl fmt::Display for PageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_range() {
            write!(f, "{}-{}", self.start, self.end)
        } else {
            write!(f, "{}", self.start)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMarker {
    Single(u32),
    Range { start: u32, end: u32 },
    Skip,
    Content,
}

impl PageMarker {
    pub fn page_info(&self) -> Option<PageInfo> {
        match *self {
            PageMarker::Single(page) => Some(PageInfo::single(page)),
            PageMarker::Range { start, end } => Some(PageInfo::range(start, end)),
            PageMarker::Skip | PageMarker::Content => None,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, PageMarker::Content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Range,
    Single,
    Skip,
}

impl MarkerKind {
    fn priority(self) -> u8 {
        match self {
            MarkerKind::Range => 0,
            MarkerKind::Single => 1,
            MarkerKind::Skip => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkerRule {
    kind: MarkerKind,
    pattern: Regex,
    start_group: usize,
    end_group: Option<usize>,
}

impl MarkerRule {
    pub fn new(
        kind: MarkerKind,
        pattern: &str,
        start_group: usize,
        end_group: Option<usize>,
    ) -> Result<Self, ReaderError> {
        let compiled = Regex::new(pattern).map_err(|source| ReaderError::InvalidRule {
            pattern: pattern.to_string(),
            source,
        })?;

        let groups = compiled.captures_len();
        let required: &[Option<usize>] = match kind {
            MarkerKind::Range => &[Some(start_group), end_group],
            MarkerKind::Single => &[Some(start_group)],
            MarkerKind::Skip => &[],
        };
        for group in required {
            match group {
                Some(group) if *group > 0 && *group < groups => {}
                other => {
                    return Err(ReaderError::MissingGroup {
                        pattern: pattern.to_string(),
                        group: other.unwrap_or(0),
                    })
                }
            }
        }

        Ok(Self {
            kind,
            pattern: compiled,
            start_group,
            end_group,
        })
    }

    pub fn skip(pattern: &str) -> Result<Self, ReaderError> {
        Self::new(MarkerKind::Skip, pattern, 0, None)
    }

    fn apply(&self, line: &str) -> Option<PageMarker> {
        match self.kind {
            MarkerKind::Skip => self.pattern.is_match(line).then_some(PageMarker::Skip),
            MarkerKind::Single => {
                let caps = self.pattern.captures(line)?;
                let page = caps.get(self.start_group)?.as_str().parse().ok()?;
                Some(PageMarker::Single(page))
            }
            MarkerKind::Range => {
                let caps = self.pattern.captures(line)?;
                let first: u32 = caps.get(self.start_group)?.as_str().parse().ok()?;
                let second: u32 = caps.get(self.end_group?)?.as_str().parse().ok()?;
                let info = PageInfo::range(first, second);
                Some(PageMarker::Range {
                    start: info.start,
                    end: info.end,
                })
            }
        }
    }
}

const RANGE_PATTERN: &str = r"(?i)^(?:pp?\.?|pages?|페이지)?\s*([0-9]{1,6})\s*[-~–—]\s*([0-9]{1,6})\s*(?:페이지|쪽|p\.?)?$";
const SINGLE_PATTERN: &str = r"(?i)^(?:p\.?|page|페이지)?\s*([0-9]{1,6})\s*(?:페이지|쪽|p\.?)?$";
const DASHED_SINGLE_PATTERN: &str = r"^[-–—]\s*([0-9]{1,6})\s*[-–—]$";
const SEPARATOR_PATTERN: &str = r"^(?:={3,}|-{3,})$";
const COMMENT_PATTERN: &str = r"^(?://|#)";

static BUILTIN_RULES: Lazy<MarkerRules> = Lazy::new(|| {
    let rules = [
        MarkerRule::new(MarkerKind::Range, RANGE_PATTERN, 1, Some(2)),
        MarkerRule::new(MarkerKind::Single, SINGLE_PATTERN, 1, None),
        MarkerRule::new(MarkerKind::Single, DASHED_SINGLE_PATTERN, 1, None),
        MarkerRule::skip(SEPARATOR_PATTERN),
        MarkerRule::skip(COMMENT_PATTERN),
    ];
    let mut set = MarkerRules::empty();
    for rule in rules.into_iter().flatten() {
        set.push(rule);
    }
    set
});

/// Ordered rule set used by the segmenter.
#[derive(Debug, Clone)]
pub struct MarkerRules {
    rules: Vec<MarkerRule>,
}

impl MarkerRules {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Korean and English page words, dashed page numbers, `===`/`---`
    /// separators and `//`/`#` comments.
    pub fn builtin() -> Self {
        BUILTIN_RULES.clone()
    }

    /// Inserts `rule` after every rule of the same or higher priority.
    pub fn push(&mut self, rule: MarkerRule) {
        let priority = rule.kind.priority();
        let at = self
            .rules
            .iter()
            .position(|existing| existing.kind.priority() > priority)
            .unwrap_or(self.rules.len());
        self.rules.insert(at, rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn classify(&self, line: &str) -> PageMarker {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return PageMarker::Skip;
        }
        self.rules
            .iter()
            .find_map(|rule| rule.apply(trimmed))
            .unwrap_or(PageMarker::Content)
    }
}

impl Default for MarkerRules {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile() {
        assert_eq!(MarkerRules::builtin().len(), 5);
    }

    #[test]
    fn classifies_single_pages() {
        let rules = MarkerRules::builtin();
        assert_eq!(rules.classify("127"), PageMarker::Single(127));
        assert_eq!(rules.classify("  128페이지 "), PageMarker::Single(128));
        assert_eq!(rules.classify("12 쪽"), PageMarker::Single(12));
        assert_eq!(rules.classify("Page 7"), PageMarker::Single(7));
        assert_eq!(rules.classify("p. 9"), PageMarker::Single(9));
        assert_eq!(rules.classify("- 42 -"), PageMarker::Single(42));
    }

    #[test]
    fn classifies_ranges_before_singles() {
        let rules = MarkerRules::builtin();
        assert_eq!(
            rules.classify("12-13"),
            PageMarker::Range { start: 12, end: 13 }
        );
        assert_eq!(
            rules.classify("12 ~ 14페이지"),
            PageMarker::Range { start: 12, end: 14 }
        );
        assert_eq!(
            rules.classify("pp. 3-4"),
            PageMarker::Range { start: 3, end: 4 }
        );
    }

    #[test]
    fn reversed_range_is_normalized() {
        let rules = MarkerRules::builtin();
        let marker = rules.classify("13-12");
        assert_eq!(marker, PageMarker::Range { start: 12, end: 13 });
        assert_eq!(marker.page_info(), Some(PageInfo { start: 12, end: 13 }));
    }

    #[test]
    fn classifies_separators_and_comments() {
        let rules = MarkerRules::builtin();
        assert_eq!(rules.classify("==="), PageMarker::Skip);
        assert_eq!(rules.classify("----------"), PageMarker::Skip);
        assert_eq!(rules.classify("// note to self"), PageMarker::Skip);
        assert_eq!(rules.classify("# heading comment"), PageMarker::Skip);
        assert_eq!(rules.classify("=="), PageMarker::Content);
    }

    #[test]
    fn ordinary_text_is_content() {
        let rules = MarkerRules::builtin();
        assert!(rules.classify("Hello world").is_content());
        assert!(rules.classify("127 apples").is_content());
        assert!(rules.classify("Chapter 3").is_content());
        assert!(rules.classify("1234567").is_content());
    }

    #[test]
    fn pushed_rules_respect_priority() {
        let mut rules = MarkerRules::empty();
        rules.push(MarkerRule::skip(r"^\*\*\*$").unwrap());
        rules.push(MarkerRule::new(MarkerKind::Single, r"^\[([0-9]+)\]$", 1, None).unwrap());
        rules.push(
            MarkerRule::new(MarkerKind::Range, r"^\[([0-9]+)/([0-9]+)\]$", 1, Some(2)).unwrap(),
        );

        assert_eq!(rules.classify("[5]"), PageMarker::Single(5));
        assert_eq!(rules.classify("[5/6]"), PageMarker::Range { start: 5, end: 6 });
        assert_eq!(rules.classify("***"), PageMarker::Skip);
        assert_eq!(rules.classify("127"), PageMarker::Content);
    }

    #[test]
    fn rule_without_required_group_is_rejected() {
        let err = MarkerRule::new(MarkerKind::Range, r"^([0-9]+)$", 1, Some(2)).unwrap_err();
        assert!(matches!(err, ReaderError::MissingGroup { group: 2, .. }));

        let err = MarkerRule::new(MarkerKind::Single, r"^[0-9]+$", 1, None).unwrap_err();
        assert!(matches!(err, ReaderError::MissingGroup { group: 1, .. }));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = MarkerRule::skip("(unclosed").unwrap_err();
        assert!(matches!(err, ReaderError::InvalidRule { .. }));
    }

    #[test]
    fn page_info_display() {
        assert_eq!(PageInfo::single(4).to_string(), "4");
        assert_eq!(PageInfo::range(9, 8).to_string(), "8-9");
    }
}
