//! # Log Boundary
//!
//! The append-only log is provided by the host. Records never move once
//! written and are only ever deleted in place (tombstoned): a deleted
//! record keeps its seq and its position in scan order but its payload is
//! gone. The engine consumes the log through this object-safe trait and
//! holds it as `Arc<dyn Log>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::errors::Result;

/// Boxed future for object-safe async trait methods
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One record as streamed from the log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// The log's own identifier for this record. Seqs increase with append
    /// order but are not contiguous.
    pub seq: u32,
    /// Encoded record bytes, or `None` when the record is tombstoned
    pub payload: Option<Vec<u8>>,
}

/// Options for [`Log::stream`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Resume strictly after this seq; `None` streams from the start
    pub after_seq: Option<u32>,
    /// Keep the stream open and deliver future appends as they land
    pub live: bool,
}

/// Ordered stream of log entries
pub type LogStream = BoxStream<'static, Result<LogEntry>>;

/// Append-only log collaborator.
///
/// `stream` yields entries in append order, tombstones included. `get`
/// fails with [`crate::errors::JetError::NotFound`] for seqs that were
/// deleted or never written.
pub trait Log: Send + Sync {
    /// Stream entries in append order according to `options`
    fn stream(&self, options: StreamOptions) -> LogStream;

    /// Read one record's payload by seq
    fn get(&self, seq: u32) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Tombstone one record in place
    fn del(&self, seq: u32) -> BoxFuture<'_, Result<()>>;

    /// Resolves once all pending deletions are durable
    fn deletes_flushed(&self) -> BoxFuture<'_, ()>;

    /// Seq of the most recently appended record, `None` for an empty log
    fn since(&self) -> Option<u32>;
}

/// Shared handle to a log
pub type LogRef = Arc<dyn Log>;
