//! Direct predicate evaluation against record bytes.
//!
//! The live engine never consults indexes: each incoming record is checked
//! against the tree right here. Prefix resolution reuses [`check_equal`]
//! to verify candidates exactly.

use crate::codec::RecordCodec;
use crate::errors::{JetError, Result};
use crate::store::{SEQUENCE_INDEX, TIMESTAMP_INDEX};

use super::{Operation, SeekFn};

/// Identity of the record being evaluated
pub(crate) struct EvalCtx<'a> {
    pub codec: &'a dyn RecordCodec,
    pub seq: u32,
    pub offset: u32,
    /// The record was handed in by the tree's own live offset feed
    pub driven: bool,
}

/// Equality check: seek the field, compare encoded bytes. A `None` value
/// matches exactly the records where the field is absent.
pub(crate) fn check_equal(
    codec: &dyn RecordCodec,
    seek: &SeekFn,
    value: Option<&[u8]>,
    bytes: &[u8],
) -> bool {
    match (seek(bytes), value) {
        (None, None) => true,
        (Some(pos), Some(value)) => codec.slice(bytes, pos) == Some(value),
        _ => false,
    }
}

/// Evaluates the whole tree against one record
pub(crate) fn matches(op: &Operation, bytes: &[u8], ctx: &EvalCtx<'_>) -> Result<bool> {
    match op {
        Operation::Equal(def) => Ok(check_equal(
            ctx.codec,
            &def.seek,
            def.value.as_deref(),
            bytes,
        )),
        Operation::Gt { index_name, value } => {
            Ok(numeric_field(index_name, bytes, ctx)? > *value)
        }
        Operation::Gte { index_name, value } => {
            Ok(numeric_field(index_name, bytes, ctx)? >= *value)
        }
        Operation::Lt { index_name, value } => {
            Ok(numeric_field(index_name, bytes, ctx)? < *value)
        }
        Operation::Lte { index_name, value } => {
            Ok(numeric_field(index_name, bytes, ctx)? <= *value)
        }
        Operation::And(children) => {
            for child in children {
                if !matches(child, bytes, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Operation::Or(children) => {
            if children.is_empty() {
                return Ok(true);
            }
            for child in children {
                if matches(child, bytes, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Operation::Seqs(seqs) => Ok(seqs.contains(&ctx.seq)),
        Operation::Offsets(offsets) => Ok(offsets.contains(&ctx.offset)),
        Operation::LiveOffsets(_) => Ok(ctx.driven),
    }
}

/// Reads the record's own field behind a numeric core index. Absent or
/// non-numeric values count as 0, matching what the index would hold.
fn numeric_field(index_name: &str, bytes: &[u8], ctx: &EvalCtx<'_>) -> Result<f64> {
    let field = match index_name {
        SEQUENCE_INDEX => SEQUENCE_INDEX,
        TIMESTAMP_INDEX => TIMESTAMP_INDEX,
        other => {
            return Err(JetError::Usage(format!(
                "range over '{other}' cannot be evaluated without its index"
            )))
        }
    };
    match ctx.codec.seek(bytes, 0, field) {
        None => Ok(0.0),
        Some(pos) => {
            let value = ctx
                .codec
                .decode(bytes, pos)
                .map_err(|e| JetError::decode(ctx.seq, e.to_string()))?;
            Ok(value.as_f64().unwrap_or(0.0))
        }
    }
}
