//! # Record Codec Boundary
//!
//! The engine never interprets record bytes itself. The host supplies a
//! codec that can navigate to a named top-level field, expose the encoded
//! bytes of a value in place, and decode a value when one is actually
//! needed. Equality is byte comparison of encoded values, so two records
//! match iff their encodings match.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Codec-level decode failure. Callers wrap it with the seq of the record
/// being decoded.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        DecodeError(reason.into())
    }
}

/// Navigates and decodes encoded record bytes.
///
/// `pos` is a byte position within the record: `0` addresses the record
/// root, any position returned by [`RecordCodec::seek`] addresses one
/// encoded value.
pub trait RecordCodec: Send + Sync {
    /// Decode the value rooted at `pos`
    fn decode(&self, bytes: &[u8], pos: usize) -> Result<Value, DecodeError>;

    /// Position of `field`'s encoded value within the value rooted at `pos`,
    /// or `None` when the field is absent
    fn seek(&self, bytes: &[u8], pos: usize, field: &str) -> Option<usize>;

    /// The encoded bytes of the value at `pos`, without decoding it
    fn slice<'a>(&self, bytes: &'a [u8], pos: usize) -> Option<&'a [u8]>;
}

/// Shared handle to a codec
pub type CodecRef = Arc<dyn RecordCodec>;
