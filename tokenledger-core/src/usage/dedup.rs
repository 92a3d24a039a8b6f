//! Deterministic identity for usage records.
//!
//! The dedup key is the only thing that stops a re-delivered event from being
//! stored twice: the store enforces it with a unique index and the merge uses
//! it to recognise records already held in memory.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use super::types::RequestDetail;

/// Format a timestamp the way it is stored and hashed.
///
/// Always UTC with nine fractional digits, e.g. `2025-01-02T03:04:05.000000000Z`,
/// so lexical order of stored values matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Returns a 64-character hex SHA-256 digest over the record's semantic fields.
///
/// Every string field is length-prefixed so that no choice of field contents
/// can make two different records encode to the same byte stream.
pub fn dedup_key(api_key: &str, model: &str, detail: &RequestDetail) -> String {
    let mut hasher = Sha256::new();

    let timestamp = format_timestamp(&detail.timestamp);
    for field in [
        api_key,
        model,
        timestamp.as_str(),
        detail.source.as_str(),
        detail.auth_index.as_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    let tokens = &detail.tokens;
    for count in [
        tokens.input_tokens,
        tokens.output_tokens,
        tokens.reasoning_tokens,
        tokens.cached_tokens,
        tokens.total_tokens,
    ] {
        hasher.update(count.to_le_bytes());
    }
    hasher.update([u8::from(detail.failed)]);

    hex::encode(hasher.finalize())
}
