use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// How long after one of our own writes an identical clipboard value is still
/// treated as the echo of that write. Bounds the race between a write and the
/// next poll tick.
pub const INTERNAL_WRITE_GRACE: Duration = Duration::from_millis(500);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait ClipboardBackend {
    fn read_text(&mut self) -> Result<String>;
    fn write_text(&mut self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardChange {
    Internal,
    External,
}

struct InternalWrite {
    text: String,
    at: Instant,
}

/// Owns the clipboard backend and tells our own writes apart from copies made
/// by other applications.
pub struct ClipboardSyncGuard {
    backend: Box<dyn ClipboardBackend>,
    pending: Option<InternalWrite>,
    last_observed: Option<String>,
}

impl ClipboardSyncGuard {
    /// Wraps `backend` and records its current content as the baseline, so
    /// whatever was on the clipboard before start-up is not reported as a
    /// change.
    pub fn new(mut backend: Box<dyn ClipboardBackend>) -> Self {
        let last_observed = match backend.read_text() {
            Ok(text) => Some(text),
            Err(err) => {
                debug!(?err, "clipboard baseline unavailable");
                None
            }
        };
        Self {
            backend,
            pending: None,
            last_observed,
        }
    }

    pub fn mark_internal(&mut self, text: &str, now: Instant) {
        self.pending = Some(InternalWrite {
            text: text.to_string(),
            at: now,
        });
    }

    /// Writes engine-produced text. Failures are logged and reported as
    /// `false`; the caller never sees an error.
    pub fn write(&mut self, text: &str, now: Instant) -> bool {
        self.mark_internal(text, now);
        match self.backend.write_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, "failed to write clipboard");
                self.pending = None;
                false
            }
        }
    }

    /// Reads the clipboard once. Returns the new text and its classification
    /// when it differs from the last observed value.
    pub fn poll(&mut self, now: Instant) -> Option<(String, ClipboardChange)> {
        let text = match self.backend.read_text() {
            Ok(text) => text,
            Err(err) => {
                debug!(?err, "clipboard read failed; retrying next tick");
                return None;
            }
        };
        if self.last_observed.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.last_observed = Some(text.clone());
        let change = self.classify(&text, now);
        Some((text, change))
    }

    fn classify(&mut self, text: &str, now: Instant) -> ClipboardChange {
        match self.pending.take() {
            Some(write)
                if write.text == text
                    && now.saturating_duration_since(write.at) < INTERNAL_WRITE_GRACE =>
            {
                ClipboardChange::Internal
            }
            _ => ClipboardChange::External,
        }
    }
}

/// In-process clipboard. Used when no system clipboard is reachable and in
/// tests; clones share the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    inner: Arc<Mutex<MemoryClipboardState>>,
}

#[derive(Debug, Default)]
struct MemoryClipboardState {
    text: String,
    fail_reads: bool,
    writes: usize,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let clipboard = Self::default();
        clipboard.set(text);
        clipboard
    }

    /// Simulates a copy made by another application.
    pub fn set(&self, text: &str) {
        self.inner.lock().text = text.to_string();
    }

    pub fn get(&self) -> String {
        self.inner.lock().text.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&mut self) -> Result<String> {
        let state = self.inner.lock();
        if state.fail_reads {
            return Err(anyhow!("clipboard unavailable"));
        }
        Ok(state.text.clone())
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        let mut state = self.inner.lock();
        state.text = text.to_string();
        state.writes += 1;
        Ok(())
    }
}
