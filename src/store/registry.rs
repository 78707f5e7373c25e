//! The name → index registry.

use std::collections::{BTreeMap, HashMap};

use crate::bitset::BitSet;

use super::buffer::{F64Arr, U32Arr};

/// Name of the core offset index (offset → seq)
pub const OFFSET_INDEX: &str = "offset";
/// Name of the core timestamp index (offset → f64 sort key)
pub const TIMESTAMP_INDEX: &str = "timestamp";
/// Name of the core sequence index (offset → application sequence)
pub const SEQUENCE_INDEX: &str = "sequence";

/// One core index: marker plus element buffer
#[derive(Debug, Clone, Default)]
pub struct CoreIndex<B> {
    /// Seq of the last record reflected, `None` until the first record
    pub marker: Option<u32>,
    pub buf: B,
}

/// Body of a derived index
#[derive(Debug, Clone)]
pub enum DerivedData {
    /// Header seen on open, body not yet loaded. The body's interpretation
    /// (bitset words or prefix elements) is fixed by the first operation
    /// that references the index.
    Lazy { count: u32 },
    /// Bitset index: one bit per matching offset
    Bits(BitSet),
    /// Prefix index: offset → first four encoded bytes of a field
    Prefixes(U32Arr),
}

/// One derived index
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Seq of the last record reflected, `None` for a fresh orphan
    pub marker: Option<u32>,
    pub data: DerivedData,
}

impl IndexEntry {
    /// Fresh bitset index that has not seen any record
    pub fn empty_bits() -> Self {
        Self {
            marker: None,
            data: DerivedData::Bits(BitSet::new()),
        }
    }

    /// Fresh prefix index that has not seen any record
    pub fn empty_prefixes() -> Self {
        Self {
            marker: None,
            data: DerivedData::Prefixes(U32Arr::new()),
        }
    }

    /// Header-only entry for a file discovered on open
    pub fn lazy(last_seq: u32, count: u32) -> Self {
        Self {
            marker: Some(last_seq),
            data: DerivedData::Lazy { count },
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.data, DerivedData::Lazy { .. })
    }
}

/// All indexes known to one engine instance
#[derive(Debug, Default)]
pub struct Registry {
    /// offset → seq; the universal join key between indexes and the log
    pub offsets: CoreIndex<U32Arr>,
    /// offset → timestamp sort key
    pub timestamps: CoreIndex<F64Arr>,
    /// offset → application-level sequence
    pub sequences: CoreIndex<U32Arr>,
    derived: HashMap<String, IndexEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            offsets: CoreIndex {
                marker: None,
                buf: U32Arr::new(),
            },
            timestamps: CoreIndex {
                marker: None,
                buf: F64Arr::new(),
            },
            sequences: CoreIndex {
                marker: None,
                buf: U32Arr::new(),
            },
            derived: HashMap::new(),
        }
    }

    /// Number of offset slots processed so far, tombstones included
    pub fn count(&self) -> u32 {
        self.offsets.buf.count()
    }

    /// Marker of the offset core index; the reference point for "in sync"
    pub fn tail_marker(&self) -> Option<u32> {
        self.offsets.marker
    }

    pub fn derived(&self, key: &str) -> Option<&IndexEntry> {
        self.derived.get(key)
    }

    pub fn derived_mut(&mut self, key: &str) -> Option<&mut IndexEntry> {
        self.derived.get_mut(key)
    }

    pub fn insert_derived(&mut self, key: String, entry: IndexEntry) {
        self.derived.insert(key, entry);
    }

    /// Inserts a fresh entry if `key` is unknown and returns the entry
    pub fn derived_or_insert(
        &mut self,
        key: &str,
        fresh: impl FnOnce() -> IndexEntry,
    ) -> &mut IndexEntry {
        self.derived.entry(key.to_string()).or_insert_with(fresh)
    }

    /// Drops every derived index and returns their keys
    pub fn clear_derived(&mut self) -> Vec<String> {
        let keys: Vec<String> = self.derived.keys().cloned().collect();
        self.derived.clear();
        keys
    }

    pub fn derived_keys(&self) -> impl Iterator<Item = &String> {
        self.derived.keys()
    }

    /// Marker positions of every index that has seen at least one record,
    /// in deterministic order
    pub fn marker_snapshot(&self) -> BTreeMap<String, u32> {
        let mut markers = BTreeMap::new();
        if let Some(m) = self.offsets.marker {
            markers.insert(OFFSET_INDEX.to_string(), m);
        }
        if let Some(m) = self.timestamps.marker {
            markers.insert(TIMESTAMP_INDEX.to_string(), m);
        }
        if let Some(m) = self.sequences.marker {
            markers.insert(SEQUENCE_INDEX.to_string(), m);
        }
        for (key, entry) in &self.derived {
            if let Some(m) = entry.marker {
                markers.insert(key.clone(), m);
            }
        }
        markers
    }

    /// Scan resume position for a start marker: the dense offset right
    /// after the marker's slot, or `None` when the marker is not present
    /// and the scan must start from the beginning.
    pub fn resume_offset(&self, marker: u32) -> Option<u32> {
        self.offsets.buf.position_of(marker).map(|p| p + 1)
    }
}
