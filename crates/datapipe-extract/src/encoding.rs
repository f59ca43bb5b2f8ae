//! Newline-delimited JSON encoding

use bytes::Bytes;

use crate::error::{ExtractError, Result};
use crate::record::Record;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Encode records as one compact JSON object per line.
///
/// Every line, including the last, ends with `\n`. No records gives an empty body.
pub fn to_ndjson(records: &[Record]) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(records.len() * 256);
    for (index, record) in records.iter().enumerate() {
        serde_json::to_writer(&mut buf, record).map_err(|e| {
            ExtractError::invalid_payload(format!("failed to encode record {}: {}", index, e))
        })?;
        buf.push(b'\n');
    }
    Ok(Bytes::from(buf))
}
