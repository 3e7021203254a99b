use thiserror::Error;

use crate::reader::Status;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("invalid marker pattern {pattern:?}: {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("marker pattern {pattern:?} has no capture group {group}")]
    MissingGroup { pattern: String, group: usize },
}

impl ReaderError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, ReaderError::InvalidTransition { .. })
    }
}
