#![allow(dead_code)]

//! Shared test fixtures: an in-memory append-only log, a length-prefixed
//! record codec, and operation builders.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use jetdb::codec::{CodecRef, DecodeError, RecordCodec};
use jetdb::engine::{Engine, EngineConfig};
use jetdb::errors::{JetError, Result};
use jetdb::log::{BoxFuture, Log, LogEntry, LogRef, LogStream, StreamOptions};
use jetdb::query::{EqualDef, Operation, SeekFn};

// =============================================================================
// Record Codec
// =============================================================================

/// Flat record encoding: a sequence of `[name_len u8][name][val_len u16 LE]
/// [val]` entries, values encoded as JSON text. `seek` returns the position
/// of a value's length prefix; `slice` exposes the JSON bytes behind it.
pub struct TestCodec;

impl TestCodec {
    fn entries(bytes: &[u8]) -> EntryIter<'_> {
        EntryIter { bytes, cursor: 0 }
    }
}

struct EntryIter<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Iterator for EntryIter<'a> {
    /// (field name, position of the value's length prefix)
    type Item = (&'a str, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.bytes.len() {
            return None;
        }
        let name_len = *self.bytes.get(self.cursor)? as usize;
        let name_start = self.cursor + 1;
        let name = self.bytes.get(name_start..name_start + name_len)?;
        let value_pos = name_start + name_len;
        let val_len_bytes = self.bytes.get(value_pos..value_pos + 2)?;
        let val_len = u16::from_le_bytes([val_len_bytes[0], val_len_bytes[1]]) as usize;
        self.cursor = value_pos + 2 + val_len;
        Some((std::str::from_utf8(name).ok()?, value_pos))
    }
}

impl RecordCodec for TestCodec {
    fn decode(&self, bytes: &[u8], pos: usize) -> std::result::Result<Value, DecodeError> {
        if pos == 0 {
            let mut map = serde_json::Map::new();
            for (name, value_pos) in Self::entries(bytes) {
                let value = self.decode(bytes, value_pos)?;
                map.insert(name.to_string(), value);
            }
            Ok(Value::Object(map))
        } else {
            let raw = self
                .slice(bytes, pos)
                .ok_or_else(|| DecodeError::new("value out of bounds"))?;
            serde_json::from_slice(raw).map_err(|e| DecodeError::new(e.to_string()))
        }
    }

    fn seek(&self, bytes: &[u8], _pos: usize, field: &str) -> Option<usize> {
        Self::entries(bytes).find(|(name, _)| *name == field).map(|(_, pos)| pos)
    }

    fn slice<'a>(&self, bytes: &'a [u8], pos: usize) -> Option<&'a [u8]> {
        let len_bytes = bytes.get(pos..pos + 2)?;
        let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        bytes.get(pos + 2..pos + 2 + len)
    }
}

/// A log record carrying the fields the core indexes read
pub fn msg(ty: &str, author: &str, timestamp: f64, sequence: u32) -> Value {
    json!({
        "type": ty,
        "author": author,
        "timestamp": timestamp,
        "sequence": sequence,
    })
}

/// Encodes a JSON object into the test record format
pub fn encode_record(fields: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields.as_object().expect("record must be an object") {
        let val = serde_json::to_vec(value).unwrap();
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(val.len() as u16).to_le_bytes());
        out.extend_from_slice(&val);
    }
    out
}

pub fn codec() -> CodecRef {
    Arc::new(TestCodec)
}

// =============================================================================
// In-Memory Log
// =============================================================================

struct LogState {
    entries: Vec<LogEntry>,
    live_senders: Vec<mpsc::UnboundedSender<LogEntry>>,
}

/// Append-only log backed by a Vec. Seqs are assigned in steps of 10, so
/// they increase with append order without being contiguous. Tombstoned
/// records keep their slot in scan order with the payload gone.
pub struct MemoryLog {
    state: Mutex<LogState>,
    // shared with the 'static streams handed out by `stream`
    streamed: Arc<AtomicU32>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                live_senders: Vec::new(),
            }),
            streamed: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Appends a record and returns its seq
    pub fn append(&self, fields: &Value) -> u32 {
        self.append_raw(encode_record(fields))
    }

    /// Appends pre-encoded bytes, bypassing the codec
    pub fn append_raw(&self, payload: Vec<u8>) -> u32 {
        let mut state = self.state.lock().unwrap();
        let seq = (state.entries.len() as u32 + 1) * 10;
        let entry = LogEntry {
            seq,
            payload: Some(payload),
        };
        state.entries.push(entry.clone());
        state.live_senders.retain(|tx| tx.send(entry.clone()).is_ok());
        seq
    }

    /// Number of entries handed to streams so far, across all scans
    pub fn records_streamed(&self) -> u32 {
        self.streamed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions still registered
    pub fn live_subscriber_count(&self) -> usize {
        self.state.lock().unwrap().live_senders.len()
    }
}

impl Log for MemoryLog {
    fn stream(&self, options: StreamOptions) -> LogStream {
        let (backlog, live_rx) = {
            let mut state = self.state.lock().unwrap();
            let backlog: Vec<LogEntry> = state
                .entries
                .iter()
                .filter(|e| options.after_seq.map_or(true, |after| e.seq > after))
                .cloned()
                .collect();
            let live_rx = if options.live {
                let (tx, rx) = mpsc::unbounded_channel();
                state.live_senders.push(tx);
                Some(rx)
            } else {
                None
            };
            (backlog, live_rx)
        };

        let counter = Arc::clone(&self.streamed);
        let head = stream::iter(backlog).map(move |entry| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(entry)
        });
        match live_rx {
            Some(rx) => {
                let counter = Arc::clone(&self.streamed);
                let tail = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|entry| (entry, rx))
                })
                .map(move |entry| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(entry)
                });
                head.chain(tail).boxed()
            }
            None => head.boxed(),
        }
    }

    fn get(&self, seq: u32) -> BoxFuture<'_, Result<Vec<u8>>> {
        let result = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .iter()
                .find(|e| e.seq == seq)
                .and_then(|e| e.payload.clone())
                .ok_or(JetError::NotFound(seq))
        };
        Box::pin(async move { result })
    }

    fn del(&self, seq: u32) -> BoxFuture<'_, Result<()>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            match state.entries.iter_mut().find(|e| e.seq == seq) {
                Some(entry) => {
                    entry.payload = None;
                    Ok(())
                }
                None => Err(JetError::NotFound(seq)),
            }
        };
        Box::pin(async move { result })
    }

    fn deletes_flushed(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn since(&self) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.entries.last().map(|e| e.seq)
    }
}

// =============================================================================
// Operation Builders
// =============================================================================

/// Seek closure navigating to `field` in the test record format
pub fn seek_fn(field: &str) -> SeekFn {
    let field = field.to_string();
    Arc::new(move |bytes| TestCodec.seek(bytes, 0, &field))
}

fn fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality over `field`, indexed as `{field}_{value}`
pub fn equal(field: &str, value: &Value) -> Operation {
    Operation::Equal(EqualDef {
        seek: seek_fn(field),
        value: Some(serde_json::to_vec(value).unwrap()),
        index_type: field.to_string(),
        index_name: format!("{field}_{}", fragment(value)),
        index_all: false,
        prefix: false,
    })
}

/// Equality matching records where `field` is absent
pub fn equal_absent(field: &str) -> Operation {
    Operation::Equal(EqualDef {
        seek: seek_fn(field),
        value: None,
        index_type: field.to_string(),
        index_name: format!("{field}_absent"),
        index_all: false,
        prefix: false,
    })
}

/// Equality that also builds sibling indexes for every observed value
pub fn equal_all(field: &str, value: &Value) -> Operation {
    Operation::Equal(EqualDef {
        seek: seek_fn(field),
        value: Some(serde_json::to_vec(value).unwrap()),
        index_type: field.to_string(),
        index_name: format!("{field}_{}", fragment(value)),
        index_all: true,
        prefix: false,
    })
}

/// Equality through a shared prefix index named after the field alone
pub fn prefix_equal(field: &str, value: &Value) -> Operation {
    Operation::Equal(EqualDef {
        seek: seek_fn(field),
        value: Some(serde_json::to_vec(value).unwrap()),
        index_type: field.to_string(),
        index_name: field.to_string(),
        index_all: false,
        prefix: true,
    })
}

// =============================================================================
// Engine Setup
// =============================================================================

/// Opens an engine over `log` with indexes stored under `dir`
pub async fn open_engine(log: Arc<MemoryLog>, dir: &Path) -> Engine {
    open_engine_with(log, EngineConfig::new(dir)).await
}

/// Opens an engine with explicit tuning
pub async fn open_engine_with(log: Arc<MemoryLog>, config: EngineConfig) -> Engine {
    let log: LogRef = log;
    Engine::open(log, codec(), config).await.expect("engine open")
}
