use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

pub mod clipboard;
pub mod config;
pub mod error;
pub mod mapping;
pub mod marker;
pub mod reader;
pub mod segment;
pub mod store;

pub use clipboard::{
    ClipboardBackend, ClipboardChange, ClipboardSyncGuard, MemoryClipboard, INTERNAL_WRITE_GRACE,
};
pub use config::ReaderConfig;
pub use error::ReaderError;
pub use marker::{MarkerKind, MarkerRule, MarkerRules, PageInfo, PageMarker};
pub use reader::{Command, Reader, ReaderEvent, ReaderSnapshot, SearchSummary, Status};
pub use segment::{AutoDetect, Segmentation, SegmentationMode, Segmenter, Unit};
pub use store::{
    fingerprint_text, FileStateStore, Fingerprint, HistoryEntry, MemoryStateStore,
    PositionRecord, StateStore,
};

/// Decoded document text plus its identity.
#[derive(Debug, Clone)]
pub struct TextDocument {
    pub fingerprint: Fingerprint,
    pub path: Option<PathBuf>,
    pub text: Arc<str>,
}

impl TextDocument {
    pub fn new(text: String, path: Option<PathBuf>) -> Self {
        Self {
            fingerprint: fingerprint_text(&text),
            path,
            text: Arc::from(text),
        }
    }
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<TextDocument>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_shares_fingerprint_across_paths() {
        let a = TextDocument::new("same".into(), Some(PathBuf::from("/a.txt")));
        let b = TextDocument::new("same".into(), Some(PathBuf::from("/b/c.txt")));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(&*a.text, "same");
    }
}
