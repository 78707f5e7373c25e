//! # Errors
//!
//! Error types shared across the index engine.

use std::path::Path;

use thiserror::Error;

/// Result type for index engine operations
pub type Result<T> = std::result::Result<T, JetError>;

/// Index engine errors.
///
/// Variants carry owned context so a result can be cloned out to every
/// caller waiting on the same coalesced rebuild.
#[derive(Debug, Clone, Error)]
pub enum JetError {
    /// Index file failed validation on load
    #[error("corrupt index file {path}: {reason}")]
    IndexCorrupt { path: String, reason: String },

    /// Record bytes could not be decoded during a scan
    #[error("undecodable record at seq {seq}: {reason}")]
    RecordDecode { seq: u32, reason: String },

    /// The underlying log failed to read
    #[error("log read failed: {0}")]
    LogRead(String),

    /// No record at the requested seq
    #[error("no record at seq {0}")]
    NotFound(u32),

    /// The query tree is malformed
    #[error("invalid query: {0}")]
    Usage(String),

    /// Filesystem failure while loading or saving an index
    #[error("index i/o failed: {0}")]
    Io(String),
}

impl JetError {
    /// Corruption error tagged with the offending file
    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        JetError::IndexCorrupt {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// I/O error tagged with the offending file
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        JetError::Io(format!("{}: {}", path.display(), err))
    }

    /// Decode error tagged with the record's seq
    pub fn decode(seq: u32, reason: impl Into<String>) -> Self {
        JetError::RecordDecode {
            seq,
            reason: reason.into(),
        }
    }
}
