//! Error taxonomy for the codec: Mcoded7, compression, JSON repair, and the
//! SysEx/CI envelope (build + parse).

use thiserror::Error;

/// A classified parse failure with the byte offset it was detected at, so a
/// caller can locate the bad frame without reconstructing context.
#[derive(Debug, Error)]
#[error("{kind} (at byte offset {offset})")]
pub struct ParseError {
    pub offset: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(offset: usize, kind: ParseErrorKind) -> Self {
        ParseError { offset, kind }
    }
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("empty input")]
    Empty,
    #[error("expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("missing SysEx start byte 0xF0")]
    NotSysEx,
    #[error("missing SysEx terminator 0xF7")]
    Unterminated,
    #[error("not a Universal System Exclusive message (expected 0x7E)")]
    NotUniversalNonRealTime,
    #[error("unsupported device ID 0x{0:02X} (expected 0x7F)")]
    BadDeviceId(u8),
    #[error("not a MIDI-CI sub-ID group (expected 0x0D)")]
    NotCiGroup,
    #[error("unknown CI sub-ID 0x{0:02X}")]
    UnknownSubId(u8),
    #[error("byte 0x{value:02X} is not 7-bit safe")]
    Not7BitSafe { value: u8 },
    #[error("reply/notification payload is missing chunk-count or body-length fields")]
    MissingChunkFields,
    #[error("inquiry payload illegally carries chunk-count or body-length fields")]
    InquiryCarriesChunkFields,
    #[error("device identity payload is shorter than the 11-byte minimum")]
    IdentityTooShort,
}

/// Errors from the Mcoded7 / zlib+Mcoded7 codec layer.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Mcoded7 data byte 0x{value:02X} at position {index} exceeds 7 bits")]
    NotSevenBitSafe { index: usize, value: u8 },
    #[error("zlib compression failed: {0}")]
    Deflate(String),
    #[error("zlib decompression failed: {0}")]
    Inflate(String),
    #[error("decompressed body of {size} bytes exceeds the {cap}-byte safety cap")]
    DecompressedTooLarge { size: usize, cap: usize },
}

/// Errors from the fault-tolerant JSON decode path used for PE bodies.
#[derive(Debug, Error)]
pub struct JsonDecodeError {
    /// Error from parsing the raw bytes as-is.
    pub strict_error: serde_json::Error,
    /// Error from parsing the preprocessed bytes, if preprocessing ran.
    pub preprocessed_error: Option<serde_json::Error>,
    /// The original, unmodified bytes handed to the first (strict) parse
    /// attempt, kept alongside `preprocessed_bytes` so a final failure can
    /// surface both byte sequences for diagnostics.
    pub original_bytes: Vec<u8>,
    /// The bytes that were handed to the second parse attempt, for diagnostics.
    pub preprocessed_bytes: Option<Vec<u8>>,
}

impl std::fmt::Display for JsonDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "strict JSON parse failed on {} original bytes: {}",
            self.original_bytes.len(),
            self.strict_error
        )?;
        if let Some(e) = &self.preprocessed_error {
            write!(
                f,
                "; preprocessed parse of {} bytes also failed: {e}",
                self.preprocessed_bytes.as_ref().map_or(0, Vec::len)
            )?;
        }
        Ok(())
    }
}
