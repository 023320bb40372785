//! Zlib + Mcoded7 body encoding, with the fallback-to-plain decision and the
//! `mutualEncoding` header field that records which path was taken.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::TranscodeError;
use crate::mcoded7;

/// Cap applied to decompressed output, regardless of what the header claims.
pub const MAX_DECOMPRESSED_BYTES: usize = 100 * 1024 * 1024;

/// Which encoding a PE body was (or should be) carried with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutualEncoding {
    /// Plain ASCII JSON, no Mcoded7 at all (legal only when the body is
    /// already 7-bit safe, e.g. came from a strict-JSON encoder).
    Ascii,
    Mcoded7,
    Mcoded7Zlib,
}

impl MutualEncoding {
    pub fn as_header_str(self) -> &'static str {
        match self {
            MutualEncoding::Ascii => "ASCII",
            MutualEncoding::Mcoded7 => "Mcoded7",
            MutualEncoding::Mcoded7Zlib => "Mcoded7ZLIB",
        }
    }

    pub fn from_header_str(s: &str) -> Option<MutualEncoding> {
        match s {
            "ASCII" => Some(MutualEncoding::Ascii),
            "Mcoded7" => Some(MutualEncoding::Mcoded7),
            "Mcoded7ZLIB" => Some(MutualEncoding::Mcoded7Zlib),
            _ => None,
        }
    }
}

/// Encode a raw JSON body for the wire, choosing zlib+Mcoded7 only when it is
/// strictly smaller than plain Mcoded7.
///
/// Returns the chosen encoding alongside the encoded bytes.
pub fn encode_body(raw: &[u8]) -> Result<(MutualEncoding, Vec<u8>), TranscodeError> {
    let plain = mcoded7::encode(raw);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| TranscodeError::Deflate(e.to_string()))?;
    let deflated = encoder
        .finish()
        .map_err(|e| TranscodeError::Deflate(e.to_string()))?;
    let compressed = mcoded7::encode(&deflated);

    if compressed.len() < plain.len() {
        Ok((MutualEncoding::Mcoded7Zlib, compressed))
    } else {
        Ok((MutualEncoding::Mcoded7, plain))
    }
}

/// Decode a PE body previously produced by `encode_body`, or plain ASCII.
pub fn decode_body(encoding: MutualEncoding, wire_bytes: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    match encoding {
        MutualEncoding::Ascii => Ok(wire_bytes.to_vec()),
        MutualEncoding::Mcoded7 => mcoded7::decode(wire_bytes),
        MutualEncoding::Mcoded7Zlib => {
            let deflated = mcoded7::decode(wire_bytes)?;
            inflate_capped(&deflated)
        }
    }
}

fn inflate_capped(deflated: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let mut decoder = ZlibDecoder::new(deflated);
    let mut out = Vec::new();
    let mut limited = (&mut decoder).take(MAX_DECOMPRESSED_BYTES as u64 + 1);
    limited
        .read_to_end(&mut out)
        .map_err(|e| TranscodeError::Inflate(e.to_string()))?;
    if out.len() > MAX_DECOMPRESSED_BYTES {
        return Err(TranscodeError::DecompressedTooLarge {
            size: out.len(),
            cap: MAX_DECOMPRESSED_BYTES,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_body_as_plain_mcoded7() {
        let raw = br#"{"a":1}"#;
        let (encoding, wire) = encode_body(raw).unwrap();
        // A 7-byte body compresses worse than it encodes plainly once zlib
        // framing overhead is included, so plain Mcoded7 should win.
        assert_eq!(encoding, MutualEncoding::Mcoded7);
        let back = decode_body(encoding, &wire).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn round_trips_large_repetitive_body_as_zlib() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "resource": "ResourceList",
            "items": vec!["same-value"; 500],
        }))
        .unwrap();
        let (encoding, wire) = encode_body(&raw).unwrap();
        assert_eq!(encoding, MutualEncoding::Mcoded7Zlib);
        let back = decode_body(encoding, &wire).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn header_round_trip_strings() {
        for enc in [
            MutualEncoding::Ascii,
            MutualEncoding::Mcoded7,
            MutualEncoding::Mcoded7Zlib,
        ] {
            let s = enc.as_header_str();
            assert_eq!(MutualEncoding::from_header_str(s), Some(enc));
        }
        assert_eq!(MutualEncoding::from_header_str("bogus"), None);
    }
}
