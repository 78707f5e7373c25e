//! Bounded top-k selection over timestamp-ranked rows.
//!
//! A capacity-k binary heap holds the best rows seen so far with the worst
//! of them on top; a new row either loses to the top or evicts it. Ranking
//! is by timestamp with the dense offset as tiebreaker, matching the order
//! a full stable sort would produce.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Keeps the k best-ranked rows of a candidate stream
pub(crate) struct TopK {
    k: usize,
    descending: bool,
    heap: BinaryHeap<HeapRow>,
}

struct HeapRow {
    rank: f64,
    offset: u32,
    seq: u32,
}

impl PartialEq for HeapRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapRow {}

impl PartialOrd for HeapRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .total_cmp(&other.rank)
            .then(self.offset.cmp(&other.offset))
    }
}

impl TopK {
    pub fn new(k: usize, descending: bool) -> Self {
        Self {
            k,
            descending,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    pub fn push(&mut self, ts: f64, offset: u32, seq: u32) {
        if self.k == 0 {
            return;
        }
        // descending queries rank by negated timestamp, so "smallest rank"
        // is always "delivered first"
        let rank = if self.descending { -ts } else { ts };
        let row = HeapRow { rank, offset, seq };
        if self.heap.len() < self.k {
            self.heap.push(row);
        } else if let Some(worst) = self.heap.peek() {
            if row.cmp(worst) == Ordering::Less {
                self.heap.pop();
                self.heap.push(row);
            }
        }
    }

    /// Selected rows as `(offset, seq)` in delivery order, best first
    pub fn into_rows(self) -> Vec<(u32, u32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|row| (row.offset, row.seq))
            .collect()
    }
}
