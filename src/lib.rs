//! jetdb - Just-in-time secondary indexes over an append-only log
//!
//! Indexes are created on first use, kept in sync incrementally, and
//! persisted as flat files next to the log. Queries are trees of typed
//! operations resolved to bitsets of matching record offsets.

pub mod bitset;
pub mod builder;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod live;
pub mod log;
pub mod paginate;
pub mod persist;
pub mod progress;
pub mod query;
pub mod store;
