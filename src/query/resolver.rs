//! Tree resolution.
//!
//! Resolution has two phases. Prepare walks the tree, loads every lazy
//! index it references and hands the builder one combined list of scan
//! targets, so a tree with several missing indexes costs a single log
//! pass. Resolution then evaluates the tree bottom-up over the synced
//! indexes, combining child bitsets with word-wise AND/OR.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::RwLock;
use tracing::warn;

use crate::bitset::BitSet;
use crate::builder::{prefix_word, Builder, LoadKind};
use crate::codec::CodecRef;
use crate::errors::{JetError, Result};
use crate::log::{BoxFuture, LogRef};
use crate::persist::sanitize;
use crate::store::{DerivedData, Registry, SEQUENCE_INDEX, TIMESTAMP_INDEX};

use super::{check_equal, plan, EqualDef, Operation, Plan, ScanTarget};

/// Resolves operation trees to bitsets of matching offsets
pub(crate) struct Resolver {
    store: Arc<RwLock<Registry>>,
    builder: Builder,
    log: LogRef,
    codec: CodecRef,
}

impl Resolver {
    pub fn new(
        store: Arc<RwLock<Registry>>,
        builder: Builder,
        log: LogRef,
        codec: CodecRef,
    ) -> Self {
        Self {
            store,
            builder,
            log,
            codec,
        }
    }

    /// Validates the tree, syncs its indexes and resolves it
    pub async fn resolve(&self, op: &Operation) -> Result<BitSet> {
        self.prepare(op).await?;
        self.bits_for(op).await
    }

    /// Validates the tree and brings every index it references in sync
    pub async fn prepare(&self, op: &Operation) -> Result<()> {
        let plan = plan(op)?;
        self.load_lazies(&plan).await?;
        self.builder.ensure_synced(&plan.targets).await
    }

    async fn load_lazies(&self, plan: &Plan) -> Result<()> {
        let mut loads: Vec<(String, LoadKind)> = Vec::new();
        {
            let reg = self.store.read().await;
            for target in &plan.targets {
                if reg.derived(target.key()).is_some_and(|e| e.is_lazy()) {
                    let kind = match target {
                        ScanTarget::Value { .. } => LoadKind::Bits,
                        ScanTarget::Prefix { .. } => LoadKind::Prefixes,
                    };
                    loads.push((target.key().to_string(), kind));
                }
            }
            for key in &plan.range_keys {
                if reg.derived(key).is_some_and(|e| e.is_lazy()) {
                    loads.push((key.clone(), LoadKind::Prefixes));
                }
            }
        }
        try_join_all(
            loads
                .iter()
                .map(|(key, kind)| self.builder.load_derived(key, *kind)),
        )
        .await?;
        Ok(())
    }

    fn bits_for<'a>(&'a self, op: &'a Operation) -> BoxFuture<'a, Result<BitSet>> {
        Box::pin(async move {
            match op {
                Operation::Equal(def) if def.prefix => self.prefix_bits(def).await,
                Operation::Equal(def) => Ok(self.value_bits(def).await),
                Operation::Gt { index_name, value } => {
                    self.range_bits(index_name, |v| v > *value).await
                }
                Operation::Gte { index_name, value } => {
                    self.range_bits(index_name, |v| v >= *value).await
                }
                Operation::Lt { index_name, value } => {
                    self.range_bits(index_name, |v| v < *value).await
                }
                Operation::Lte { index_name, value } => {
                    self.range_bits(index_name, |v| v <= *value).await
                }
                Operation::And(children) => {
                    if children.is_empty() {
                        return self.everything().await;
                    }
                    let mut acc = self.bits_for(&children[0]).await?;
                    for child in &children[1..] {
                        acc = acc.intersect(&self.bits_for(child).await?);
                    }
                    Ok(acc)
                }
                Operation::Or(children) => {
                    if children.is_empty() {
                        return self.everything().await;
                    }
                    let mut acc = self.bits_for(&children[0]).await?;
                    for child in &children[1..] {
                        acc = acc.union(&self.bits_for(child).await?);
                    }
                    Ok(acc)
                }
                Operation::Seqs(seqs) => {
                    let reg = self.store.read().await;
                    let mut bits = BitSet::new();
                    for seq in seqs {
                        if let Some(offset) = reg.offsets.buf.position_of(*seq) {
                            bits.add(offset);
                        }
                    }
                    Ok(bits)
                }
                Operation::Offsets(offsets) => {
                    let reg = self.store.read().await;
                    let count = reg.count();
                    let mut bits = BitSet::new();
                    for offset in offsets {
                        if *offset < count {
                            bits.add(*offset);
                        }
                    }
                    Ok(bits)
                }
                // live-only leaf: contributes nothing to a paged resolution
                Operation::LiveOffsets(_) => Ok(BitSet::new()),
            }
        })
    }

    /// All offset slots processed so far, tombstones included
    async fn everything(&self) -> Result<BitSet> {
        let reg = self.store.read().await;
        let mut bits = BitSet::new();
        for offset in 0..reg.count() {
            bits.add(offset);
        }
        Ok(bits)
    }

    async fn value_bits(&self, def: &EqualDef) -> BitSet {
        let key = sanitize(&def.index_name);
        let reg = self.store.read().await;
        match reg.derived(&key) {
            Some(entry) => match &entry.data {
                DerivedData::Bits(bits) => bits.clone(),
                _ => {
                    warn!(index = %key, "equality resolved against a non-bitset index");
                    BitSet::new()
                }
            },
            // nothing was ever scanned (empty log)
            None => BitSet::new(),
        }
    }

    /// Prefix candidates are verified by fetching each record and comparing
    /// the full encoded value, so prefix collisions never leak into results.
    async fn prefix_bits(&self, def: &EqualDef) -> Result<BitSet> {
        let Some(value) = def.value.as_deref() else {
            return Err(JetError::Usage(
                "a prefix equality needs a value".into(),
            ));
        };
        let key = sanitize(&def.index_name);
        let word = prefix_word(value);

        let candidates: Vec<(u32, u32)> = {
            let reg = self.store.read().await;
            let Some(entry) = reg.derived(&key) else {
                return Ok(BitSet::new());
            };
            let DerivedData::Prefixes(arr) = &entry.data else {
                return Err(JetError::Usage(format!(
                    "index '{key}' is not a prefix index"
                )));
            };
            arr.live()
                .iter()
                .enumerate()
                .filter(|(_, w)| **w == word)
                .filter_map(|(offset, _)| {
                    reg.offsets
                        .buf
                        .get(offset as u32)
                        .map(|seq| (offset as u32, seq))
                })
                .collect()
        };

        let mut bits = BitSet::new();
        for (offset, seq) in candidates {
            match self.log.get(seq).await {
                Ok(bytes) => {
                    if check_equal(self.codec.as_ref(), &def.seek, Some(value), &bytes) {
                        bits.add(offset);
                    }
                }
                // deleted since it was indexed
                Err(JetError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(bits)
    }

    async fn range_bits(&self, index_name: &str, cmp: impl Fn(f64) -> bool) -> Result<BitSet> {
        let reg = self.store.read().await;
        let mut bits = BitSet::new();
        match index_name {
            SEQUENCE_INDEX => {
                for (offset, v) in reg.sequences.buf.live().iter().enumerate() {
                    if cmp(f64::from(*v)) {
                        bits.add(offset as u32);
                    }
                }
            }
            TIMESTAMP_INDEX => {
                for (offset, v) in reg.timestamps.buf.live().iter().enumerate() {
                    if cmp(*v) {
                        bits.add(offset as u32);
                    }
                }
            }
            other => {
                let key = sanitize(other);
                let Some(entry) = reg.derived(&key) else {
                    return Err(JetError::Usage(format!("unknown index '{other}'")));
                };
                match &entry.data {
                    DerivedData::Prefixes(arr) => {
                        for (offset, v) in arr.live().iter().enumerate() {
                            if cmp(f64::from(*v)) {
                                bits.add(offset as u32);
                            }
                        }
                    }
                    DerivedData::Bits(_) => {
                        return Err(JetError::Usage(format!(
                            "index '{other}' is not numeric"
                        )))
                    }
                    DerivedData::Lazy { .. } => {
                        return Err(JetError::Io(format!("index '{key}' is not loaded")))
                    }
                }
            }
        }
        Ok(bits)
    }
}
