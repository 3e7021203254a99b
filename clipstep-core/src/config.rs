use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::clipboard::DEFAULT_POLL_INTERVAL;
use crate::error::ReaderError;
use crate::marker::{MarkerKind, MarkerRule, MarkerRules};
use crate::segment::{AutoDetect, SegmentationMode, Segmenter};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub persist_debounce: Duration,
    pub default_mode: Option<SegmentationMode>,
    pub auto_detect: AutoDetect,
    pub markers: MarkerConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            persist_debounce: Duration::from_secs(1),
            default_mode: None,
            auto_detect: AutoDetect::default(),
            markers: MarkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Keep the built-in page-word rules in front of `rules`.
    pub builtin: bool,
    pub rules: Vec<MarkerRuleConfig>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRuleConfig {
    pub kind: MarkerKind,
    pub pattern: String,
    #[serde(default = "default_start_group")]
    pub start_group: usize,
    #[serde(default)]
    pub end_group: Option<usize>,
}

fn default_start_group() -> usize {
    1
}

impl ReaderConfig {
    /// `<config_dir>/config.toml` for the current platform.
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join(CONFIG_FILE_NAME)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn marker_rules(&self) -> Result<MarkerRules, ReaderError> {
        let mut rules = if self.markers.builtin {
            MarkerRules::builtin()
        } else {
            MarkerRules::empty()
        };
        for rule in &self.markers.rules {
            rules.push(MarkerRule::new(
                rule.kind,
                &rule.pattern,
                rule.start_group,
                rule.end_group,
            )?);
        }
        Ok(rules)
    }

    pub fn segmenter(&self) -> Result<Segmenter, ReaderError> {
        Ok(Segmenter::new(self.marker_rules()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::PageMarker;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn parses_partial_config() {
        let config = ReaderConfig::from_toml_str(
            r#"
            poll_interval = 250
            default_mode = "line"

            [auto_detect]
            min_long_lines = 3

            [[markers.rules]]
            kind = "single"
            pattern = '^\[([0-9]+)\]$'
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.persist_debounce, Duration::from_secs(1));
        assert_eq!(config.default_mode, Some(SegmentationMode::Line));
        assert_eq!(config.auto_detect.min_long_lines, 3);
        assert_eq!(config.auto_detect.long_line_chars, 20);

        let rules = config.marker_rules().unwrap();
        assert_eq!(rules.len(), MarkerRules::builtin().len() + 1);
        assert_eq!(rules.classify("[8]"), PageMarker::Single(8));
        assert_eq!(rules.classify("8"), PageMarker::Single(8));
    }

    #[test]
    fn builtin_rules_can_be_disabled() {
        let config = ReaderConfig::from_toml_str(
            r#"
            [markers]
            builtin = false
            "#,
        )
        .unwrap();
        let rules = config.marker_rules().unwrap();
        assert!(rules.is_empty());
        assert_eq!(rules.classify("127"), PageMarker::Content);
    }

    #[test]
    fn bad_rule_surfaces_error() {
        let config = ReaderConfig::from_toml_str(
            r#"
            [[markers.rules]]
            kind = "range"
            pattern = '^([0-9]+)$'
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.marker_rules(),
            Err(ReaderError::MissingGroup { .. })
        ));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "poll_interval = \"soon\"").unwrap();
        assert!(ReaderConfig::load(&path).is_err());
    }
}
