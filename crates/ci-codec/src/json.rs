//! Decode entry point tying strict `serde_json` parsing to the
//! fault-tolerant preprocessing pass in [`crate::json_repair`].

use crate::error::JsonDecodeError;
use crate::json_repair::preprocess;

/// Decode a PE body as JSON, trying a strict parse first and falling back to
/// the repair pipeline only on failure. Never repairs speculatively: a body
/// that parses strictly is trusted as-is.
pub fn decode_json(bytes: &[u8]) -> Result<serde_json::Value, JsonDecodeError> {
    let strict_error = match serde_json::from_slice(bytes) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => {
            return Err(JsonDecodeError {
                strict_error,
                preprocessed_error: None,
                original_bytes: bytes.to_vec(),
                preprocessed_bytes: None,
            })
        }
    };

    let repaired = preprocess(text);
    if !repaired.changed {
        return Err(JsonDecodeError {
            strict_error,
            preprocessed_error: None,
            original_bytes: bytes.to_vec(),
            preprocessed_bytes: None,
        });
    }

    match serde_json::from_str(&repaired.text) {
        Ok(value) => {
            tracing::debug!(
                original_len = bytes.len(),
                repaired_len = repaired.text.len(),
                "recovered JSON body via preprocessing"
            );
            Ok(value)
        }
        Err(preprocessed_error) => Err(JsonDecodeError {
            strict_error,
            preprocessed_error: Some(preprocessed_error),
            original_bytes: bytes.to_vec(),
            preprocessed_bytes: Some(repaired.text.into_bytes()),
        }),
    }
}
