//! Body decoding with the KORG-compatibility fallback order: declared
//! encoding, then raw ASCII, then Mcoded7 as a last resort.

use ci_codec::{decode_body, decode_json, MutualEncoding};

use crate::error::TransactionError;

fn try_decode(encoding: MutualEncoding, body: &[u8]) -> Option<serde_json::Value> {
    let decoded = decode_body(encoding, body).ok()?;
    decode_json(&decoded).ok()
}

/// Decode a reassembled PE body to JSON, trying the header's declared
/// encoding first. Some devices declare one encoding but actually send
/// plain ASCII or bare Mcoded7; fall back through those before giving up.
pub fn decode_pe_body(
    declared: MutualEncoding,
    body: &[u8],
) -> Result<serde_json::Value, TransactionError> {
    if let Some(v) = try_decode(declared, body) {
        return Ok(v);
    }
    if declared != MutualEncoding::Ascii {
        if let Some(v) = try_decode(MutualEncoding::Ascii, body) {
            return Ok(v);
        }
    }
    if declared != MutualEncoding::Mcoded7 {
        if let Some(v) = try_decode(MutualEncoding::Mcoded7, body) {
            return Ok(v);
        }
    }
    Err(TransactionError::Malformed(
        "PE body did not decode as JSON under any known encoding".into(),
    ))
}

/// Parse a PE header (always sent uncompressed) to JSON, using the same
/// fault-tolerant decoder PE bodies get.
pub fn decode_pe_header(header: &[u8]) -> Result<serde_json::Value, TransactionError> {
    decode_json(header).map_err(|e| TransactionError::Malformed(e.to_string()))
}

pub fn declared_encoding(header: &serde_json::Value) -> MutualEncoding {
    header
        .get("mutualEncoding")
        .and_then(|v| v.as_str())
        .and_then(MutualEncoding::from_header_str)
        .unwrap_or(MutualEncoding::Ascii)
}

pub fn status_of(header: &serde_json::Value) -> u16 {
    header
        .get("status")
        .and_then(|v| v.as_u64())
        .map(|v| v as u16)
        .unwrap_or(200)
}
