use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chardetng::EncodingDetector;
use clipstep_core::{DocumentProvider, TextDocument};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Bytes inspected when guessing UTF-16 without a byte order mark.
const SNIFF_LEN: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed {0} data")]
    Malformed(&'static str),
    #[error("binary content (NUL character at position {0})")]
    Binary(usize),
}

#[derive(Debug, Error)]
pub enum TextError {
    #[error("cannot read {path:?} as text: {reason}")]
    Unreadable {
        path: PathBuf,
        #[source]
        reason: DecodeError,
    },
}

/// Picks an encoding and the length of its byte order mark.
///
/// A BOM wins. Unmarked UTF-16 is recognised by the zero high bytes of Latin
/// text. Valid UTF-8 is taken as is; anything else goes to `chardetng`, which
/// covers legacy encodings such as EUC-KR and Shift_JIS.
pub fn detect_encoding(bytes: &[u8]) -> (&'static Encoding, usize) {
    if let Some(found) = Encoding::for_bom(bytes) {
        return found;
    }
    if let Some(utf16) = sniff_utf16(bytes) {
        return (utf16, 0);
    }
    if Encoding::utf8_valid_up_to(bytes) == bytes.len() {
        return (UTF_8, 0);
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    (detector.guess(None, true), 0)
}

fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    let sample = &bytes[..bytes.len().min(SNIFF_LEN) & !1];
    if sample.is_empty() {
        return None;
    }
    let pairs = sample.len() / 2;
    let (even_nuls, odd_nuls) = sample
        .chunks_exact(2)
        .fold((0usize, 0usize), |(even, odd), pair| {
            (even + usize::from(pair[0] == 0), odd + usize::from(pair[1] == 0))
        });
    // Latin text in UTF-16 has a zero in every other byte.
    if odd_nuls * 4 >= pairs && even_nuls * 8 <= odd_nuls {
        Some(UTF_16LE)
    } else if even_nuls * 4 >= pairs && odd_nuls * 8 <= even_nuls {
        Some(UTF_16BE)
    } else {
        None
    }
}

pub fn decode_text(bytes: &[u8]) -> Result<(String, &'static Encoding), DecodeError> {
    let (encoding, bom_len) = detect_encoding(bytes);
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .ok_or(DecodeError::Malformed(encoding.name()))?
        .into_owned();
    if let Some(position) = text.find('\0') {
        return Err(DecodeError::Binary(position));
    }
    Ok((text, encoding))
}

/// Opens plain-text files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDocumentProvider;

impl TextDocumentProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, path: &Path) -> Result<TextDocument> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let bytes =
            fs::read(&absolute).with_context(|| format!("failed to read {:?}", absolute))?;
        let (text, encoding) = decode_text(&bytes).map_err(|reason| TextError::Unreadable {
            path: absolute.clone(),
            reason,
        })?;
        debug!(encoding = encoding.name(), bytes = bytes.len(), "decoded document");
        info!(path = ?absolute, chars = text.chars().count(), "loaded text document");
        Ok(TextDocument::new(text, Some(absolute)))
    }
}

#[async_trait]
impl DocumentProvider for TextDocumentProvider {
    #[instrument(skip(self))]
    async fn open(&self, path: &Path) -> Result<TextDocument> {
        self.load(path)
    }
}
