//! # Index Persistence
//!
//! On-disk index files live flat in one directory, named by sanitized index
//! name plus the `.idx` extension. Every file is an 8-byte little-endian
//! header (`last_seq: u32`, `count: u32`) followed by the body: `u32`
//! elements for offset, sequence and prefix indexes, `f64` elements for the
//! timestamp index, packed `u32` words for bitset indexes. Saves are atomic
//! (write-to-temp then rename), so a file is either the old version or the
//! new one.

mod file;
mod names;

pub use file::{
    index_path, list_index_files, load_f64, load_u32, read_header, remove_file, save_f64,
    save_u32, IndexHeader, INDEX_EXT,
};
pub use names::sanitize;
