//! Tree validation and the pre-scan.
//!
//! Before anything is resolved, the tree is walked once to validate shape
//! and to collect what resolution will need: one scan target per equality
//! leaf (the builder skips targets that are already in sync) and the names
//! of numeric indexes referenced by range leaves.

use crate::errors::{JetError, Result};
use crate::persist::sanitize;
use crate::store::{SEQUENCE_INDEX, TIMESTAMP_INDEX};

use super::{EqualDef, Operation, SeekFn};

/// What one scan pass must keep updated for an equality leaf
#[derive(Clone)]
pub(crate) enum ScanTarget {
    /// Bitset index for one concrete value
    Value {
        key: String,
        seek: SeekFn,
        value: Option<Vec<u8>>,
        /// Fan out sibling indexes for every observed value of the field
        index_all: bool,
        index_type: String,
    },
    /// Shared prefix index for a field
    Prefix { key: String, seek: SeekFn },
}

impl ScanTarget {
    pub fn key(&self) -> &str {
        match self {
            ScanTarget::Value { key, .. } => key,
            ScanTarget::Prefix { key, .. } => key,
        }
    }
}

/// Everything the resolver needs to prepare a tree
#[derive(Default)]
pub(crate) struct Plan {
    /// One target per equality leaf, keyed by sanitized index name
    pub targets: Vec<ScanTarget>,
    /// Sanitized names of non-core numeric indexes referenced by ranges
    pub range_keys: Vec<String>,
    /// Whether the tree carries a live offset feed
    pub has_live_source: bool,
}

/// Validates `op` and collects its scan targets
pub(crate) fn plan(op: &Operation) -> Result<Plan> {
    let mut plan = Plan::default();
    let mut live_leaves = 0usize;
    walk(op, &mut plan, &mut live_leaves)?;
    if live_leaves > 1 {
        return Err(JetError::Usage(
            "a query tree may contain at most one live offset source".into(),
        ));
    }
    plan.has_live_source = live_leaves == 1;
    // one target per index name is enough for the combined scan
    plan.targets
        .sort_by(|a, b| a.key().cmp(b.key()));
    plan.targets.dedup_by(|a, b| a.key() == b.key());
    plan.range_keys.sort();
    plan.range_keys.dedup();
    Ok(plan)
}

fn walk(op: &Operation, plan: &mut Plan, live_leaves: &mut usize) -> Result<()> {
    match op {
        Operation::Equal(def) => {
            validate_equal(def)?;
            plan.targets.push(target_for(def));
        }
        Operation::Gt { index_name, .. }
        | Operation::Gte { index_name, .. }
        | Operation::Lt { index_name, .. }
        | Operation::Lte { index_name, .. } => {
            if index_name != SEQUENCE_INDEX && index_name != TIMESTAMP_INDEX {
                plan.range_keys.push(sanitize(index_name));
            }
        }
        Operation::And(children) | Operation::Or(children) => {
            for child in children {
                walk(child, plan, live_leaves)?;
            }
        }
        Operation::Seqs(_) | Operation::Offsets(_) => {}
        Operation::LiveOffsets(_) => {
            *live_leaves += 1;
        }
    }
    Ok(())
}

fn validate_equal(def: &EqualDef) -> Result<()> {
    if def.prefix && def.value.is_none() {
        return Err(JetError::Usage(
            "a prefix equality needs a value; absence cannot be prefix-matched".into(),
        ));
    }
    if def.prefix && def.index_all {
        return Err(JetError::Usage(
            "prefix and index_all cannot be combined".into(),
        ));
    }
    Ok(())
}

fn target_for(def: &EqualDef) -> ScanTarget {
    if def.prefix {
        ScanTarget::Prefix {
            key: sanitize(&def.index_name),
            seek: def.seek.clone(),
        }
    } else {
        ScanTarget::Value {
            key: sanitize(&def.index_name),
            seek: def.seek.clone(),
            value: def.value.clone(),
            index_all: def.index_all,
            index_type: def.index_type.clone(),
        }
    }
}

/// Extra validation for live queries: ranges can only be evaluated directly
/// against the numeric core fields, and the offset feed (when present) must
/// still be consumable.
pub(crate) fn validate_live(op: &Operation) -> Result<()> {
    match op {
        Operation::Gt { index_name, .. }
        | Operation::Gte { index_name, .. }
        | Operation::Lt { index_name, .. }
        | Operation::Lte { index_name, .. } => {
            if index_name != SEQUENCE_INDEX && index_name != TIMESTAMP_INDEX {
                return Err(JetError::Usage(format!(
                    "live ranges are limited to '{SEQUENCE_INDEX}' and '{TIMESTAMP_INDEX}', got '{index_name}'"
                )));
            }
            Ok(())
        }
        Operation::And(children) | Operation::Or(children) => {
            for child in children {
                validate_live(child)?;
            }
            Ok(())
        }
        Operation::Equal(_)
        | Operation::Seqs(_)
        | Operation::Offsets(_)
        | Operation::LiveOffsets(_) => Ok(()),
    }
}

/// First live offset feed in the tree, if any
pub(crate) fn find_live_source(op: &Operation) -> Option<super::OffsetSource> {
    match op {
        Operation::LiveOffsets(source) => Some(source.clone()),
        Operation::And(children) | Operation::Or(children) => {
            children.iter().find_map(find_live_source)
        }
        _ => None,
    }
}
