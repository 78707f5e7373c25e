//! # Core Index Store
//!
//! The in-memory registry of all indexes. The three core indexes (offset,
//! timestamp, sequence) are dedicated fields and always present; derived
//! (bitset and prefix) indexes live in a map keyed by sanitized name. Index
//! files discovered on open enter the registry lazily, header only, and get
//! their body loaded the first time a query references them.
//!
//! Readers share the registry behind an async `RwLock`; the builder is the
//! only writer and mutates between whole-record scan steps, so readers
//! always observe a consistent snapshot, at worst momentarily stale.

mod buffer;
mod registry;

pub use buffer::{ElementBuf, F64Arr, U32Arr};
pub use registry::{
    CoreIndex, DerivedData, IndexEntry, Registry, OFFSET_INDEX, SEQUENCE_INDEX, TIMESTAMP_INDEX,
};
