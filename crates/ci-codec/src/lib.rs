//! SysEx framing and message codec for MIDI-CI / Property Exchange.
//!
//! This crate owns the wire format only: building and parsing CI envelopes,
//! Mcoded7 and zlib+Mcoded7 body transcoding, device identity and MUID
//! encoding, and fault-tolerant JSON recovery for non-conforming PE bodies.
//! It has no notion of chunk reassembly, transactions, or transport — those
//! live in sibling crates.

pub mod compress;
pub mod error;
pub mod identity;
pub mod json;
pub mod json_repair;
pub mod mcoded7;
pub mod message;
pub mod muid;
pub mod sysex;

pub use compress::{decode_body, encode_body, MutualEncoding, MAX_DECOMPRESSED_BYTES};
pub use error::{JsonDecodeError, ParseError, ParseErrorKind, TranscodeError};
pub use identity::{DeviceIdentity, ManufacturerId};
pub use json::decode_json;
pub use message::{CiMessage, PeInquiryKind, PeReplyKind, CI_VERSION};
pub use muid::Muid;
pub use sysex::{build, parse};
