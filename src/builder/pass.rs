//! One forward scan over the log.
//!
//! A pass starts at the furthest-behind participant's marker (resolved to a
//! dense offset by binary search over the offset core index), streams
//! records in order, and applies each record to every participant that has
//! not seen it yet. Markers advance per record, so a pass that overlaps
//! already-indexed ground is idempotent. Modified indexes are persisted at
//! completion and every `save_every` records along the way.

use std::collections::BTreeSet;
use std::path::PathBuf;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::errors::{JetError, Result};
use crate::log::{LogEntry, StreamOptions};
use crate::persist::{index_path, sanitize, save_f64, save_u32};
use crate::progress::ProgressSnapshot;
use crate::query::{check_equal, ScanTarget};
use crate::store::{
    DerivedData, IndexEntry, Registry, OFFSET_INDEX, SEQUENCE_INDEX, TIMESTAMP_INDEX,
};

use super::Builder;

/// Where a pass begins
enum ScanStart {
    /// Every participant is already at the tail
    Synced,
    /// At least one participant has never seen a record
    FromStart,
    /// Resume strictly after this marker, assigning offsets from here
    After { marker: u32, first_offset: u32 },
}

enum SaveJob {
    U32(PathBuf, u32, Vec<u32>),
    F64(PathBuf, u32, Vec<f64>),
}

impl Builder {
    pub(super) async fn run_pass(&self, targets: &[ScanTarget]) -> Result<()> {
        let _gate = self.gate().await;
        let Some(tail) = self.log.since() else {
            return Ok(());
        };

        let (after_seq, mut next_offset) = {
            let mut reg = self.store.write().await;
            for target in targets {
                match target {
                    ScanTarget::Value { key, .. } => {
                        reg.derived_or_insert(key, IndexEntry::empty_bits);
                    }
                    ScanTarget::Prefix { key, .. } => {
                        reg.derived_or_insert(key, IndexEntry::empty_prefixes);
                    }
                }
            }
            match scan_start(&reg, targets, tail) {
                ScanStart::Synced => return Ok(()),
                ScanStart::FromStart => (None, 0),
                ScanStart::After {
                    marker,
                    first_offset,
                } => (Some(marker), first_offset),
            }
        };

        let mut stream = self.log.stream(StreamOptions {
            after_seq,
            live: false,
        });
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut last_seq: Option<u32> = None;
        let mut since_save: u32 = 0;
        let mut processed: u64 = 0;

        while let Some(item) = stream.next().await {
            let entry = item?;
            let offset = next_offset;
            next_offset += 1;
            {
                let mut reg = self.store.write().await;
                self.apply_record(&mut reg, targets, offset, &entry, &mut touched)?;
            }
            last_seq = Some(entry.seq);
            processed += 1;
            since_save += 1;
            if since_save >= self.save_every {
                since_save = 0;
                self.persist_indexes(&touched).await?;
                self.publish_progress().await;
            }
        }

        if let Some(last) = last_seq {
            // indexes that only saw some of the records (index_all siblings,
            // value indexes with sparse matches) are synced through the
            // whole scanned range
            let mut reg = self.store.write().await;
            for target in targets {
                bump_marker(&mut reg, target.key(), last);
            }
            for key in &touched {
                bump_marker(&mut reg, key, last);
            }
        }

        self.persist_indexes(&touched).await?;
        self.publish_progress().await;
        debug!(records = processed, targets = targets.len(), "index pass complete");
        Ok(())
    }

    fn apply_record(
        &self,
        reg: &mut Registry,
        targets: &[ScanTarget],
        offset: u32,
        entry: &LogEntry,
        touched: &mut BTreeSet<String>,
    ) -> Result<()> {
        let seq = entry.seq;

        if behind(reg.offsets.marker, seq) {
            reg.offsets.buf.set(offset, seq);
            reg.offsets.marker = Some(seq);
        }

        let Some(bytes) = entry.payload.as_deref() else {
            // tombstone: the slot stays occupied with neutral values
            if behind(reg.timestamps.marker, seq) {
                reg.timestamps.buf.set(offset, 0.0);
                reg.timestamps.marker = Some(seq);
            }
            if behind(reg.sequences.marker, seq) {
                reg.sequences.buf.set(offset, 0);
                reg.sequences.marker = Some(seq);
            }
            for target in targets {
                let key = target.key();
                if let Some(entry) = reg.derived_mut(key) {
                    if behind(entry.marker, seq) {
                        if let DerivedData::Prefixes(arr) = &mut entry.data {
                            arr.set(offset, 0);
                        }
                        entry.marker = Some(seq);
                        touched.insert(key.to_string());
                    }
                }
            }
            return Ok(());
        };

        if behind(reg.timestamps.marker, seq) {
            let ts = self.field_f64(bytes, TIMESTAMP_INDEX, seq)?;
            reg.timestamps.buf.set(offset, ts);
            reg.timestamps.marker = Some(seq);
        }
        if behind(reg.sequences.marker, seq) {
            let sq = self.field_u32(bytes, SEQUENCE_INDEX, seq)?;
            reg.sequences.buf.set(offset, sq);
            reg.sequences.marker = Some(seq);
        }

        for target in targets {
            match target {
                ScanTarget::Value {
                    key,
                    seek,
                    value,
                    index_all,
                    index_type,
                } => {
                    if let Some(entry) = reg.derived_mut(key) {
                        if behind(entry.marker, seq) {
                            if let DerivedData::Bits(bits) = &mut entry.data {
                                if check_equal(self.codec.as_ref(), seek, value.as_deref(), bytes)
                                {
                                    bits.add(offset);
                                }
                            }
                            entry.marker = Some(seq);
                            touched.insert(key.clone());
                        }
                    }
                    if *index_all {
                        if let Some(pos) = seek(bytes) {
                            let decoded = self
                                .codec
                                .decode(bytes, pos)
                                .map_err(|e| JetError::decode(seq, e.to_string()))?;
                            let sibling =
                                sanitize(&format!("{index_type}_{}", value_fragment(&decoded)));
                            let entry = reg.derived_or_insert(&sibling, IndexEntry::empty_bits);
                            // a sibling that is still lazy keeps its on-disk
                            // marker; the next query of it loads and rescans
                            if behind(entry.marker, seq) {
                                if let DerivedData::Bits(bits) = &mut entry.data {
                                    bits.add(offset);
                                    entry.marker = Some(seq);
                                    touched.insert(sibling);
                                }
                            }
                        }
                    }
                }
                ScanTarget::Prefix { key, seek } => {
                    if let Some(entry) = reg.derived_mut(key) {
                        if behind(entry.marker, seq) {
                            if let DerivedData::Prefixes(arr) = &mut entry.data {
                                let word = seek(bytes)
                                    .and_then(|pos| self.codec.slice(bytes, pos))
                                    .map(prefix_word)
                                    .unwrap_or(0);
                                arr.set(offset, word);
                            }
                            entry.marker = Some(seq);
                            touched.insert(key.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Persists the cores plus every touched derived index. Indexes that
    /// have never seen a record stay memory-only.
    pub(crate) async fn persist_indexes(&self, touched: &BTreeSet<String>) -> Result<()> {
        let mut jobs: Vec<SaveJob> = Vec::new();
        {
            let reg = self.store.read().await;
            if let Some(marker) = reg.offsets.marker {
                jobs.push(SaveJob::U32(
                    index_path(&self.dir, OFFSET_INDEX),
                    marker,
                    reg.offsets.buf.live().to_vec(),
                ));
            }
            if let Some(marker) = reg.timestamps.marker {
                jobs.push(SaveJob::F64(
                    index_path(&self.dir, TIMESTAMP_INDEX),
                    marker,
                    reg.timestamps.buf.live().to_vec(),
                ));
            }
            if let Some(marker) = reg.sequences.marker {
                jobs.push(SaveJob::U32(
                    index_path(&self.dir, SEQUENCE_INDEX),
                    marker,
                    reg.sequences.buf.live().to_vec(),
                ));
            }
            for key in touched {
                let Some(entry) = reg.derived(key) else {
                    continue;
                };
                let Some(marker) = entry.marker else {
                    continue;
                };
                match &entry.data {
                    DerivedData::Bits(bits) => jobs.push(SaveJob::U32(
                        index_path(&self.dir, key),
                        marker,
                        bits.trimmed_words().to_vec(),
                    )),
                    DerivedData::Prefixes(arr) => jobs.push(SaveJob::U32(
                        index_path(&self.dir, key),
                        marker,
                        arr.live().to_vec(),
                    )),
                    DerivedData::Lazy { .. } => {}
                }
            }
        }
        if jobs.is_empty() {
            return Ok(());
        }

        let files = jobs.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for job in jobs {
                match job {
                    SaveJob::U32(path, marker, elements) => save_u32(&path, marker, &elements)?,
                    SaveJob::F64(path, marker, elements) => save_f64(&path, marker, &elements)?,
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| JetError::Io(format!("index save task failed: {e}")))??;
        debug!(files, "indexes persisted");
        Ok(())
    }

    pub(crate) async fn publish_progress(&self) {
        let snapshot = {
            let reg = self.store.read().await;
            ProgressSnapshot {
                indexes: reg.marker_snapshot(),
            }
        };
        self.progress.publish(snapshot);
    }

    fn field_f64(&self, bytes: &[u8], field: &str, seq: u32) -> Result<f64> {
        match self.codec.seek(bytes, 0, field) {
            None => Ok(0.0),
            Some(pos) => {
                let value = self
                    .codec
                    .decode(bytes, pos)
                    .map_err(|e| JetError::decode(seq, e.to_string()))?;
                Ok(value.as_f64().unwrap_or(0.0))
            }
        }
    }

    fn field_u32(&self, bytes: &[u8], field: &str, seq: u32) -> Result<u32> {
        match self.codec.seek(bytes, 0, field) {
            None => Ok(0),
            Some(pos) => {
                let value = self
                    .codec
                    .decode(bytes, pos)
                    .map_err(|e| JetError::decode(seq, e.to_string()))?;
                Ok(value
                    .as_u64()
                    .map(|n| n.min(u64::from(u32::MAX)) as u32)
                    .unwrap_or(0))
            }
        }
    }
}

fn behind(marker: Option<u32>, seq: u32) -> bool {
    marker.map_or(true, |m| m < seq)
}

fn bump_marker(reg: &mut Registry, key: &str, last: u32) {
    if let Some(entry) = reg.derived_mut(key) {
        entry.marker = Some(entry.marker.map_or(last, |m| m.max(last)));
    }
}

fn scan_start(reg: &Registry, targets: &[ScanTarget], tail: u32) -> ScanStart {
    let mut from_start = false;
    let mut min_marker: Option<u32> = None;
    {
        let mut track = |marker: Option<u32>| match marker {
            None => from_start = true,
            Some(m) => min_marker = Some(min_marker.map_or(m, |cur| cur.min(m))),
        };
        track(reg.offsets.marker);
        track(reg.timestamps.marker);
        track(reg.sequences.marker);
        for target in targets {
            track(reg.derived(target.key()).and_then(|e| e.marker));
        }
    }
    if from_start {
        return ScanStart::FromStart;
    }
    let Some(marker) = min_marker else {
        return ScanStart::FromStart;
    };
    if marker == tail {
        return ScanStart::Synced;
    }
    match reg.resume_offset(marker) {
        Some(first_offset) => ScanStart::After {
            marker,
            first_offset,
        },
        // the marker is not in the offset index (e.g. indexes written by a
        // newer log than ours); rescanning from the start is always safe
        None => ScanStart::FromStart,
    }
}

/// Stable string fragment of a decoded value, used to name index_all
/// sibling indexes
fn value_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// First four bytes of an encoded value as a little-endian word, zero
/// padded; 0 marks an absent field
pub(crate) fn prefix_word(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        word[i] = *b;
    }
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_behind_orders_markers() {
        assert!(behind(None, 1));
        assert!(behind(Some(5), 6));
        assert!(!behind(Some(6), 6));
        assert!(!behind(Some(7), 6));
    }

    #[test]
    fn test_value_fragment_shapes() {
        assert_eq!(value_fragment(&json!("post")), "post");
        assert_eq!(value_fragment(&json!(12)), "12");
        assert_eq!(value_fragment(&json!(true)), "true");
        assert_eq!(value_fragment(&json!(null)), "null");
    }

    #[test]
    fn test_prefix_word_pads_and_truncates() {
        assert_eq!(prefix_word(b""), 0);
        assert_eq!(prefix_word(b"a"), u32::from_le_bytes([b'a', 0, 0, 0]));
        assert_eq!(
            prefix_word(b"abcdef"),
            u32::from_le_bytes([b'a', b'b', b'c', b'd'])
        );
    }
}
