//! # Result Materialization
//!
//! Turns a resolved bitset into delivered records: attach each matching
//! offset's timestamp sort key, stable-sort (direction flips the comparison
//! only, ties stay in offset order), slice the requested window, then fetch
//! and decode the records. Records tombstoned after their index bits were
//! set are dropped from the page without backfilling, so pages may come up
//! short.

mod topk;

pub(crate) use topk::TopK;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::bitset::BitSet;
use crate::codec::CodecRef;
use crate::errors::{JetError, Result};
use crate::log::LogRef;
use crate::store::Registry;

/// One decoded record as delivered by queries
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    /// Dense row id
    pub offset: u32,
    /// The log's id for this record
    pub seq: u32,
    /// Decoded record value
    pub value: serde_json::Value,
}

/// One page of query results
#[derive(Debug)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Total matches before slicing
    pub total: u64,
    /// Time from query start to page assembly
    pub elapsed: Duration,
}

struct Row {
    offset: u32,
    seq: u32,
    ts: f64,
}

/// Materializes pages from resolved bitsets
pub(crate) struct Materializer {
    store: Arc<RwLock<Registry>>,
    log: LogRef,
    codec: CodecRef,
}

impl Materializer {
    pub fn new(store: Arc<RwLock<Registry>>, log: LogRef, codec: CodecRef) -> Self {
        Self { store, log, codec }
    }

    pub async fn page(
        &self,
        bits: &BitSet,
        page_start: u64,
        limit: Option<u64>,
        descending: bool,
        started: Instant,
    ) -> Result<QueryPage> {
        let total = bits.cardinality();
        let mut rows = self.keyed_rows(bits).await;
        sort_rows(&mut rows, descending);
        let window = slice_rows(rows, page_start, limit);
        let records = self
            .fetch(window.into_iter().map(|r| (r.offset, r.seq)).collect())
            .await?;
        Ok(QueryPage {
            records,
            total,
            elapsed: started.elapsed(),
        })
    }

    /// Like a first page of size `k`, but selected with a bounded heap
    /// instead of sorting every match
    pub async fn top(
        &self,
        bits: &BitSet,
        k: usize,
        descending: bool,
        started: Instant,
    ) -> Result<QueryPage> {
        let total = bits.cardinality();
        let rows = self.keyed_rows(bits).await;
        let mut topk = TopK::new(k, descending);
        for row in rows {
            topk.push(row.ts, row.offset, row.seq);
        }
        let records = self.fetch(topk.into_rows()).await?;
        Ok(QueryPage {
            records,
            total,
            elapsed: started.elapsed(),
        })
    }

    async fn keyed_rows(&self, bits: &BitSet) -> Vec<Row> {
        let reg = self.store.read().await;
        bits.iter()
            .filter_map(|offset| {
                // a bit past the core count means the derived index got
                // ahead of the cores on disk; such rows are unresolvable
                let seq = reg.offsets.buf.get(offset)?;
                let ts = reg.timestamps.buf.get(offset).unwrap_or(0.0);
                Some(Row { offset, seq, ts })
            })
            .collect()
    }

    async fn fetch(&self, rows: Vec<(u32, u32)>) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(rows.len());
        for (offset, seq) in rows {
            match self.log.get(seq).await {
                Ok(bytes) => {
                    let value = self
                        .codec
                        .decode(&bytes, 0)
                        .map_err(|e| JetError::decode(seq, e.to_string()))?;
                    records.push(Record { offset, seq, value });
                }
                // tombstoned since the index bit was set
                Err(JetError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

fn sort_rows(rows: &mut [Row], descending: bool) {
    if descending {
        rows.sort_by(|a, b| b.ts.total_cmp(&a.ts));
    } else {
        rows.sort_by(|a, b| a.ts.total_cmp(&b.ts));
    }
}

fn slice_rows(rows: Vec<Row>, page_start: u64, limit: Option<u64>) -> Vec<Row> {
    let len = rows.len() as u64;
    let start = page_start.min(len) as usize;
    let end = match limit {
        Some(l) => page_start.saturating_add(l).min(len) as usize,
        None => rows.len(),
    };
    rows.into_iter().skip(start).take(end - start).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ts: &[f64]) -> Vec<Row> {
        ts.iter()
            .enumerate()
            .map(|(i, t)| Row {
                offset: i as u32,
                seq: i as u32 * 10,
                ts: *t,
            })
            .collect()
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let mut window = rows(&[3.0, 1.0, 3.0, 2.0]);
        sort_rows(&mut window, false);
        let offsets: Vec<u32> = window.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 3, 0, 2]);

        let mut window = rows(&[3.0, 1.0, 3.0, 2.0]);
        sort_rows(&mut window, true);
        let offsets: Vec<u32> = window.iter().map(|r| r.offset).collect();
        // descending, but the two ts=3.0 rows keep their offset order
        assert_eq!(offsets, vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_slice_windows_concatenate() {
        let all: Vec<u32> = slice_rows(rows(&[1.0, 2.0, 3.0, 4.0, 5.0]), 0, None)
            .iter()
            .map(|r| r.offset)
            .collect();

        let mut paged = Vec::new();
        for start in [0u64, 2, 4] {
            paged.extend(
                slice_rows(rows(&[1.0, 2.0, 3.0, 4.0, 5.0]), start, Some(2))
                    .iter()
                    .map(|r| r.offset),
            );
        }
        assert_eq!(paged, all);
    }

    #[test]
    fn test_slice_beyond_end_is_empty() {
        assert!(slice_rows(rows(&[1.0]), 5, Some(2)).is_empty());
        assert!(slice_rows(Vec::new(), 0, None).is_empty());
    }

    #[test]
    fn test_slice_without_limit_takes_tail() {
        let tail: Vec<u32> = slice_rows(rows(&[1.0, 2.0, 3.0]), 1, None)
            .iter()
            .map(|r| r.offset)
            .collect();
        assert_eq!(tail, vec![1, 2]);
    }
}
