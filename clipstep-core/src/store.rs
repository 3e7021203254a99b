use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use tracing::warn;
use uuid::Uuid;

use crate::marker::PageInfo;
use crate::segment::{SegmentationMode, Unit};

/// Content-derived document identity.
pub type Fingerprint = Uuid;

const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x5c1f_2b7e_90d4_5a63_b8e1_4f0a_c2d7_e913);

/// Hashes the raw text, so a moved or renamed file keeps its history while an
/// edited one starts fresh.
pub fn fingerprint_text(raw: &str) -> Fingerprint {
    Uuid::new_v5(&FINGERPRINT_NAMESPACE, raw.as_bytes())
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub fingerprint: Fingerprint,
    pub current_index: usize,
    pub page_info: Option<PageInfo>,
    pub mode: SegmentationMode,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: SystemTime,
}

impl PositionRecord {
    pub fn for_unit(fingerprint: Fingerprint, mode: SegmentationMode, unit: &Unit) -> Self {
        Self {
            fingerprint,
            current_index: unit.index,
            page_info: unit.page_info,
            mode,
            start_offset: unit.start_offset,
            end_offset: unit.end_offset,
            timestamp: SystemTime::now(),
        }
    }
}

/// Everything remembered about one document.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub fingerprint: Fingerprint,
    pub file_path: Option<PathBuf>,
    /// Mode picked explicitly for this document, if any.
    pub mode: Option<SegmentationMode>,
    pub position: Option<PositionRecord>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub last_opened: SystemTime,
}

impl HistoryEntry {
    pub fn new(fingerprint: Fingerprint, file_path: Option<PathBuf>) -> Self {
        Self {
            fingerprint,
            file_path,
            mode: None,
            position: None,
            last_opened: SystemTime::now(),
        }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>>;
    fn save(&self, entry: &HistoryEntry) -> Result<()>;
    /// All entries, most recently opened first.
    fn entries(&self) -> Result<Vec<HistoryEntry>>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create history directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!("{}.json", fingerprint))
    }

    fn read_entry(path: &Path) -> Result<HistoryEntry> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open history file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode history file {:?}", path))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    fn save(&self, entry: &HistoryEntry) -> Result<()> {
        let path = self.entry_path(&entry.fingerprint);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(entry)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp history file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list history directory {:?}", self.root))?;
        for item in dir {
            let path = item?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(?err, ?path, "skipping unreadable history entry"),
            }
        }
        entries.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        Ok(entries)
    }
}

pub struct MemoryStateStore {
    inner: Mutex<HashMap<Fingerprint, HistoryEntry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>> {
        Ok(self.inner.lock().get(fingerprint).cloned())
    }

    fn save(&self, entry: &HistoryEntry) -> Result<()> {
        self.inner.lock().insert(entry.fingerprint, entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<_> = self.inner.lock().values().cloned().collect();
        entries.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        Ok(entries)
    }
}
