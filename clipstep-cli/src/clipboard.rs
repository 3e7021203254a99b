use anyhow::{Context, Result};
use arboard::Clipboard;
use clipstep_core::{ClipboardBackend, MemoryClipboard};
use tracing::{info, warn};

pub struct SystemClipboard {
    inner: Clipboard,
}

impl ClipboardBackend for SystemClipboard {
    fn read_text(&mut self) -> Result<String> {
        self.inner.get_text().context("failed to read system clipboard")
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.inner
            .set_text(text)
            .context("failed to write system clipboard")
    }
}

/// The system clipboard when one is reachable, otherwise an in-process one
/// so reading still works over ssh or in a bare console.
pub fn open_backend() -> Box<dyn ClipboardBackend> {
    match Clipboard::new() {
        Ok(inner) => {
            info!("using system clipboard");
            Box::new(SystemClipboard { inner })
        }
        Err(err) => {
            warn!(?err, "system clipboard unavailable; falling back to in-process clipboard");
            Box::new(MemoryClipboard::new())
        }
    }
}
