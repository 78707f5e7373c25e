//! Index file reading and writing.
//!
//! All functions here do blocking filesystem work; async callers run them
//! on the blocking pool.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;

use crate::errors::{JetError, Result};

/// Extension shared by every index file
pub const INDEX_EXT: &str = "idx";

const HEADER_LEN: usize = 8;

/// Parsed 8-byte index file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Seq of the last record reflected in the body
    pub last_seq: u32,
    /// Number of body elements (typed-array entries or bitset words)
    pub count: u32,
}

/// Path of the index file for a sanitized name
pub fn index_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.{INDEX_EXT}"))
}

/// Lists `(key, path)` for every index file in `dir`
pub fn list_index_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| JetError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| JetError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(INDEX_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.push((stem.to_string(), path.clone()));
        }
    }
    found.sort();
    Ok(found)
}

/// Atomically writes a `u32`-element index file
pub fn save_u32(path: &Path, last_seq: u32, elements: &[u32]) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_LEN + elements.len() * 4);
    encode_header(&mut buf, last_seq, elements.len() as u32);
    for v in elements {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    write_atomic(path, &buf)
}

/// Atomically writes an `f64`-element index file
pub fn save_f64(path: &Path, last_seq: u32, elements: &[f64]) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_LEN + elements.len() * 8);
    encode_header(&mut buf, last_seq, elements.len() as u32);
    for v in elements {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    write_atomic(path, &buf)
}

/// Reads just the header of an index file
pub fn read_header(path: &Path) -> Result<IndexHeader> {
    let mut file = File::open(path).map_err(|e| JetError::io(path, e))?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|_| JetError::corrupt(path, "truncated header"))?;
    Ok(decode_header(&header))
}

/// Loads a `u32`-element index file, validating the header against the body
pub fn load_u32(path: &Path) -> Result<(IndexHeader, Vec<u32>)> {
    let (header, body) = load_body(path, 4)?;
    let elements = body
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((header, elements))
}

/// Loads an `f64`-element index file, validating the header against the body
pub fn load_f64(path: &Path) -> Result<(IndexHeader, Vec<f64>)> {
    let (header, body) = load_body(path, 8)?;
    let elements = body
        .chunks_exact(8)
        .map(|c| {
            f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
        })
        .collect();
    Ok((header, elements))
}

/// Removes an index file; a file that is already gone is not an error
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JetError::io(path, e)),
    }
}

fn encode_header(buf: &mut Vec<u8>, last_seq: u32, count: u32) {
    buf.extend_from_slice(&last_seq.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
}

fn decode_header(header: &[u8; HEADER_LEN]) -> IndexHeader {
    IndexHeader {
        last_seq: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
        count: u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
    }
}

fn load_body(path: &Path, elem_size: usize) -> Result<(IndexHeader, Vec<u8>)> {
    let data = fs::read(path).map_err(|e| JetError::io(path, e))?;
    if data.len() < HEADER_LEN {
        return Err(JetError::corrupt(path, "truncated header"));
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&data[..HEADER_LEN]);
    let header = decode_header(&header);

    let body = &data[HEADER_LEN..];
    let expected = header.count as usize * elem_size;
    if body.len() != expected {
        return Err(JetError::corrupt(
            path,
            format!("body is {} bytes, header says {}", body.len(), expected),
        ));
    }
    Ok((header, body.to_vec()))
}

fn write_atomic(path: &Path, buf: &[u8]) -> Result<()> {
    let mut file = AtomicWriteFile::open(path).map_err(|e| JetError::io(path, e))?;
    file.write_all(buf).map_err(|e| JetError::io(path, e))?;
    file.commit().map_err(|e| JetError::io(path, e))?;
    Ok(())
}
