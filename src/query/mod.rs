//! # Query Operations
//!
//! Queries are trees of typed operations. Leaves describe predicates over
//! records or direct offset/seq selections; `And`/`Or` combine children by
//! bitset algebra. Resolution turns a tree into a bitset of matching
//! offsets after bringing every referenced index in sync.

mod eval;
mod plan;
pub(crate) mod resolver;

pub(crate) use eval::{check_equal, matches, EvalCtx};
pub(crate) use plan::{find_live_source, plan, validate_live, Plan, ScanTarget};

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::stream::BoxStream;
use futures_util::Stream;

/// Navigates record bytes to the encoded value of one field, or `None`
/// when the record has no such field
pub type SeekFn = Arc<dyn Fn(&[u8]) -> Option<usize> + Send + Sync>;

/// Equality predicate over one field
#[derive(Clone)]
pub struct EqualDef {
    /// Field navigator for the record encoding in use
    pub seek: SeekFn,
    /// Encoded value to match; `None` matches records where the field is
    /// absent
    pub value: Option<Vec<u8>>,
    /// Name of the field path, e.g. `"type"` or `"value_content_type"`
    pub index_type: String,
    /// Index identity; value indexes embed the value, prefix indexes are
    /// named by `index_type` alone
    pub index_name: String,
    /// While building this index, also build sibling indexes for every
    /// other value observed in the field
    pub index_all: bool,
    /// Use a shared prefix index plus exact verification instead of one
    /// bitset per value
    pub prefix: bool,
}

impl fmt::Debug for EqualDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EqualDef")
            .field("value", &self.value)
            .field("index_type", &self.index_type)
            .field("index_name", &self.index_name)
            .field("index_all", &self.index_all)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Handle to an external feed of offsets driving a live query.
///
/// The feed is consumed once, by the live engine; cloning the handle shares
/// the single underlying stream.
#[derive(Clone)]
pub struct OffsetSource {
    inner: Arc<StdMutex<Option<BoxStream<'static, u32>>>>,
}

impl OffsetSource {
    pub fn new(stream: impl Stream<Item = u32> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(Some(Box::pin(stream)))),
        }
    }

    /// Takes the underlying stream; `None` if it was already consumed
    pub(crate) fn take(&self) -> Option<BoxStream<'static, u32>> {
        match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl fmt::Debug for OffsetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OffsetSource")
    }
}

/// One node of a query tree
#[derive(Debug, Clone)]
pub enum Operation {
    /// Field equality via a bitset or prefix index
    Equal(EqualDef),
    /// Strictly greater, against a numeric index
    Gt { index_name: String, value: f64 },
    /// Greater or equal, against a numeric index
    Gte { index_name: String, value: f64 },
    /// Strictly less, against a numeric index
    Lt { index_name: String, value: f64 },
    /// Less or equal, against a numeric index
    Lte { index_name: String, value: f64 },
    /// Every child matches; empty matches everything
    And(Vec<Operation>),
    /// Any child matches; empty matches everything
    Or(Vec<Operation>),
    /// Records whose log seq is in the list
    Seqs(Vec<u32>),
    /// Records whose dense offset is in the list
    Offsets(Vec<u32>),
    /// Live-only leaf driven by an external offset feed
    LiveOffsets(OffsetSource),
}

impl Operation {
    /// The tree that matches every record: sequence ≥ 0 holds for all
    /// offset slots, tombstones included
    pub fn everything() -> Operation {
        Operation::Gte {
            index_name: crate::store::SEQUENCE_INDEX.to_string(),
            value: 0.0,
        }
    }
}
