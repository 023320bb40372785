//! SysEx envelope framing and the MIDI-CI message build/parse pair.
//!
//! Wire format (bit-exact, §6):
//! `F0 7E <deviceID=0x7F> 0D <subID> <version> <srcMUID:4> <dstMUID:4> <payload> F7`

use crate::error::{ParseError, ParseErrorKind};
use crate::identity::{DeviceIdentity, WIRE_LEN as IDENTITY_LEN};
use crate::message::*;
use crate::muid::Muid;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Trailing reserved bytes in a full Discovery Reply, sent as zero and
/// ignored on parse. Future protocol revisions may assign these; a device
/// on an older revision simply omits them, which is exactly the partial
/// case below.
const DISCOVERY_REPLY_RESERVED_LEN: usize = 6;

/// Canonical Discovery Reply payload length (identity + category + max
/// SysEx size + output path id + function block + reserved). Replies
/// shorter than this but carrying at least the 11-byte identity are
/// accepted as `partial` (see DESIGN.md).
const DISCOVERY_REPLY_CANONICAL_LEN: usize =
    IDENTITY_LEN + 1 + 4 + 1 + 1 + DISCOVERY_REPLY_RESERVED_LEN;

fn push_u14(out: &mut Vec<u8>, v: u16) {
    out.push((v & 0x7F) as u8);
    out.push(((v >> 7) & 0x7F) as u8);
}

fn read_u14(bytes: &[u8], offset: usize) -> Result<u16, ParseError> {
    if bytes.len() < 2 {
        return Err(ParseError::new(
            offset,
            ParseErrorKind::TooShort {
                expected: 2,
                got: bytes.len(),
            },
        ));
    }
    for (i, &b) in bytes[..2].iter().enumerate() {
        if b & 0x80 != 0 {
            return Err(ParseError::new(
                offset + i,
                ParseErrorKind::Not7BitSafe { value: b },
            ));
        }
    }
    Ok((bytes[0] as u16) | ((bytes[1] as u16) << 7))
}

fn push_u28(out: &mut Vec<u8>, v: u32) {
    out.push((v & 0x7F) as u8);
    out.push(((v >> 7) & 0x7F) as u8);
    out.push(((v >> 14) & 0x7F) as u8);
    out.push(((v >> 21) & 0x7F) as u8);
}

fn read_u28(bytes: &[u8], offset: usize) -> Result<u32, ParseError> {
    if bytes.len() < 4 {
        return Err(ParseError::new(
            offset,
            ParseErrorKind::TooShort {
                expected: 4,
                got: bytes.len(),
            },
        ));
    }
    for (i, &b) in bytes[..4].iter().enumerate() {
        if b & 0x80 != 0 {
            return Err(ParseError::new(
                offset + i,
                ParseErrorKind::Not7BitSafe { value: b },
            ));
        }
    }
    Ok((bytes[0] as u32)
        | ((bytes[1] as u32) << 7)
        | ((bytes[2] as u32) << 14)
        | ((bytes[3] as u32) << 21))
}

fn push_header(out: &mut Vec<u8>, sub_id: u8, source: Muid, destination: Muid) {
    out.push(SYSEX_START);
    out.push(UNIVERSAL_NON_REALTIME);
    out.push(DEVICE_ID_BROADCAST);
    out.push(CI_SUB_ID_1);
    out.push(sub_id);
    out.push(CI_VERSION);
    out.extend_from_slice(&source.to_bytes());
    out.extend_from_slice(&destination.to_bytes());
}

/// Build the SysEx byte sequence for a CI message.
pub fn build(msg: &CiMessage) -> Vec<u8> {
    let mut out = Vec::new();
    match msg {
        CiMessage::DiscoveryInquiry {
            source,
            destination,
            identity,
            category_support,
            max_sysex_size,
        } => {
            push_header(&mut out, SUB_ID_DISCOVERY_INQUIRY, *source, *destination);
            out.extend_from_slice(&identity.to_bytes());
            out.push(category_support & 0x7F);
            push_u28(&mut out, *max_sysex_size);
        }
        CiMessage::DiscoveryReply {
            source,
            destination,
            identity,
            category_support,
            max_sysex_size,
            initiator_output_path_id,
            function_block,
            partial: _,
        } => {
            push_header(&mut out, SUB_ID_DISCOVERY_REPLY, *source, *destination);
            out.extend_from_slice(&identity.to_bytes());
            out.push(category_support & 0x7F);
            push_u28(&mut out, *max_sysex_size);
            out.push(initiator_output_path_id & 0x7F);
            out.push(function_block & 0x7F);
            out.extend_from_slice(&[0u8; DISCOVERY_REPLY_RESERVED_LEN]);
        }
        CiMessage::InvalidateMuid {
            source,
            destination,
            target,
        } => {
            push_header(&mut out, SUB_ID_INVALIDATE_MUID, *source, *destination);
            out.extend_from_slice(&target.to_bytes());
        }
        CiMessage::Nak {
            source,
            destination,
            original_sub_id,
            status_code,
        } => {
            push_header(&mut out, SUB_ID_NAK, *source, *destination);
            out.push(original_sub_id & 0x7F);
            out.push(status_code & 0x7F);
        }
        CiMessage::PeInquiry {
            kind,
            source,
            destination,
            request_id,
            header,
        } => {
            push_header(&mut out, kind.sub_id(), *source, *destination);
            out.push(request_id & 0x7F);
            push_u14(&mut out, header.len() as u16);
            out.extend_from_slice(header);
        }
        CiMessage::PeReply {
            kind,
            source,
            destination,
            request_id,
            header,
            num_chunks,
            this_chunk,
            body,
        } => {
            push_header(&mut out, kind.sub_id(), *source, *destination);
            out.push(request_id & 0x7F);
            push_u14(&mut out, header.len() as u16);
            out.extend_from_slice(header);
            push_u14(&mut out, *num_chunks);
            push_u14(&mut out, *this_chunk);
            push_u14(&mut out, body.len() as u16);
            out.extend_from_slice(body);
        }
    }
    out.push(SYSEX_END);
    out
}

/// Parse a raw byte sequence into a classified `CiMessage`.
pub fn parse(bytes: &[u8]) -> Result<CiMessage, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::new(0, ParseErrorKind::Empty));
    }
    if bytes[0] != SYSEX_START {
        return Err(ParseError::new(0, ParseErrorKind::NotSysEx));
    }
    if *bytes.last().unwrap() != SYSEX_END {
        return Err(ParseError::new(bytes.len() - 1, ParseErrorKind::Unterminated));
    }
    if bytes.len() < 14 {
        return Err(ParseError::new(
            0,
            ParseErrorKind::TooShort {
                expected: 14,
                got: bytes.len(),
            },
        ));
    }
    if bytes[1] != UNIVERSAL_NON_REALTIME {
        return Err(ParseError::new(1, ParseErrorKind::NotUniversalNonRealTime));
    }
    if bytes[2] != DEVICE_ID_BROADCAST {
        return Err(ParseError::new(2, ParseErrorKind::BadDeviceId(bytes[2])));
    }
    if bytes[3] != CI_SUB_ID_1 {
        return Err(ParseError::new(3, ParseErrorKind::NotCiGroup));
    }
    let sub_id = bytes[4];
    // bytes[5] is the CI version byte; accepted but not currently validated
    // against a supported set, matching real-world CI version skew.
    let source = Muid::from_bytes(bytes[6..10].try_into().unwrap(), 6)?;
    let destination = Muid::from_bytes(bytes[10..14].try_into().unwrap(), 10)?;
    let payload = &bytes[14..bytes.len() - 1];
    let payload_offset = 14;

    match sub_id {
        SUB_ID_DISCOVERY_INQUIRY => {
            let identity = DeviceIdentity::from_bytes(payload, payload_offset)?;
            let category_support = payload.get(IDENTITY_LEN).copied().unwrap_or(0);
            let max_sysex_size = if payload.len() >= IDENTITY_LEN + 5 {
                read_u28(
                    &payload[IDENTITY_LEN + 1..IDENTITY_LEN + 5],
                    payload_offset + IDENTITY_LEN + 1,
                )?
            } else {
                0
            };
            Ok(CiMessage::DiscoveryInquiry {
                source,
                destination,
                identity,
                category_support,
                max_sysex_size,
            })
        }
        SUB_ID_DISCOVERY_REPLY => {
            let identity = DeviceIdentity::from_bytes(payload, payload_offset)?;
            let category_support = payload.get(IDENTITY_LEN).copied().unwrap_or(0);
            let max_sysex_size = if payload.len() >= IDENTITY_LEN + 5 {
                read_u28(
                    &payload[IDENTITY_LEN + 1..IDENTITY_LEN + 5],
                    payload_offset + IDENTITY_LEN + 1,
                )?
            } else {
                0
            };
            let initiator_output_path_id = payload.get(IDENTITY_LEN + 5).copied().unwrap_or(0);
            let function_block = payload.get(IDENTITY_LEN + 6).copied().unwrap_or(0);
            let partial = payload.len() < DISCOVERY_REPLY_CANONICAL_LEN;
            Ok(CiMessage::DiscoveryReply {
                source,
                destination,
                identity,
                category_support,
                max_sysex_size,
                initiator_output_path_id,
                function_block,
                partial,
            })
        }
        SUB_ID_INVALIDATE_MUID => {
            if payload.len() < 4 {
                return Err(ParseError::new(
                    payload_offset,
                    ParseErrorKind::TooShort {
                        expected: 4,
                        got: payload.len(),
                    },
                ));
            }
            let target = Muid::from_bytes(payload[0..4].try_into().unwrap(), payload_offset)?;
            Ok(CiMessage::InvalidateMuid {
                source,
                destination,
                target,
            })
        }
        SUB_ID_NAK => {
            if payload.len() < 2 {
                return Err(ParseError::new(
                    payload_offset,
                    ParseErrorKind::TooShort {
                        expected: 2,
                        got: payload.len(),
                    },
                ));
            }
            Ok(CiMessage::Nak {
                source,
                destination,
                original_sub_id: payload[0],
                status_code: payload[1],
            })
        }
        SUB_ID_PE_GET_INQUIRY | SUB_ID_PE_SET_INQUIRY | SUB_ID_PE_SUBSCRIBE_INQUIRY => {
            let kind = match sub_id {
                SUB_ID_PE_GET_INQUIRY => PeInquiryKind::Get,
                SUB_ID_PE_SET_INQUIRY => PeInquiryKind::Set,
                _ => PeInquiryKind::Subscribe,
            };
            parse_pe_inquiry(kind, source, destination, payload, payload_offset)
        }
        _ => {
            if let Some(kind) = PeReplyKind::from_sub_id(sub_id) {
                parse_pe_reply(kind, source, destination, payload, payload_offset)
            } else {
                Err(ParseError::new(4, ParseErrorKind::UnknownSubId(sub_id)))
            }
        }
    }
}

fn parse_pe_inquiry(
    kind: PeInquiryKind,
    source: Muid,
    destination: Muid,
    payload: &[u8],
    offset: usize,
) -> Result<CiMessage, ParseError> {
    if payload.is_empty() {
        return Err(ParseError::new(
            offset,
            ParseErrorKind::TooShort {
                expected: 3,
                got: payload.len(),
            },
        ));
    }
    let request_id = payload[0] & 0x7F;
    let header_len = read_u14(&payload[1..], offset + 1)? as usize;
    let header_start = 3;
    let header_end = header_start + header_len;
    if payload.len() < header_end {
        return Err(ParseError::new(
            offset + header_start,
            ParseErrorKind::TooShort {
                expected: header_len,
                got: payload.len().saturating_sub(header_start),
            },
        ));
    }
    if payload.len() > header_end {
        // An inquiry must not carry chunk-count / body-length fields.
        return Err(ParseError::new(
            offset + header_end,
            ParseErrorKind::InquiryCarriesChunkFields,
        ));
    }
    Ok(CiMessage::PeInquiry {
        kind,
        source,
        destination,
        request_id,
        header: payload[header_start..header_end].to_vec(),
    })
}

fn parse_pe_reply(
    kind: PeReplyKind,
    source: Muid,
    destination: Muid,
    payload: &[u8],
    offset: usize,
) -> Result<CiMessage, ParseError> {
    if payload.is_empty() {
        return Err(ParseError::new(
            offset,
            ParseErrorKind::TooShort {
                expected: 3,
                got: payload.len(),
            },
        ));
    }
    let request_id = payload[0] & 0x7F;
    let header_len = read_u14(&payload[1..], offset + 1)? as usize;
    let header_start = 3;
    let header_end = header_start + header_len;
    if payload.len() < header_end + 6 {
        return Err(ParseError::new(offset + header_end, ParseErrorKind::MissingChunkFields));
    }
    let num_chunks = read_u14(&payload[header_end..], offset + header_end)?;
    let this_chunk = read_u14(&payload[header_end + 2..], offset + header_end + 2)?;
    let body_len = read_u14(&payload[header_end + 4..], offset + header_end + 4)? as usize;
    let body_start = header_end + 6;
    let body_end = body_start + body_len;
    if payload.len() < body_end {
        return Err(ParseError::new(
            offset + body_start,
            ParseErrorKind::TooShort {
                expected: body_len,
                got: payload.len().saturating_sub(body_start),
            },
        ));
    }
    Ok(CiMessage::PeReply {
        kind,
        source,
        destination,
        request_id,
        header: payload[header_start..header_end].to_vec(),
        num_chunks,
        this_chunk,
        body: payload[body_start..body_end].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ManufacturerId;

    fn sample_identity() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: ManufacturerId::Standard(0x42),
            family: 0x0004,
            model: 0x0001,
            version: 0x0000_0001,
        }
    }

    #[test]
    fn round_trips_discovery_inquiry() {
        let msg = CiMessage::DiscoveryInquiry {
            source: Muid::from_raw(0x0123_4567),
            destination: Muid::broadcast(),
            identity: sample_identity(),
            category_support: 0x7F,
            max_sysex_size: 4096,
        };
        let bytes = build(&msg);
        assert_eq!(bytes[0], SYSEX_START);
        assert_eq!(*bytes.last().unwrap(), SYSEX_END);
        assert!(bytes[1..bytes.len() - 1].iter().all(|&b| b <= 0x7F));
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn round_trips_discovery_reply() {
        let msg = CiMessage::DiscoveryReply {
            source: Muid::from_raw(0x7654_3210 & 0x0FFF_FFFF),
            destination: Muid::from_raw(0x0123_4567),
            identity: sample_identity(),
            category_support: 0x05,
            max_sysex_size: 512,
            initiator_output_path_id: 0,
            function_block: 0,
            partial: false,
        };
        let bytes = build(&msg);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn built_discovery_reply_is_the_24_byte_canonical_payload_and_not_partial() {
        let msg = CiMessage::DiscoveryReply {
            source: Muid::from_raw(1),
            destination: Muid::from_raw(2),
            identity: sample_identity(),
            category_support: 0x05,
            max_sysex_size: 512,
            initiator_output_path_id: 0,
            function_block: 0,
            partial: false,
        };
        let bytes = build(&msg);
        // header(4 universal) + sub_id + version + src(4) + dst(4) = 14 fixed
        // bytes, then the payload, then F7.
        let payload_len = bytes.len() - 14 - 1;
        assert_eq!(payload_len, DISCOVERY_REPLY_CANONICAL_LEN);
        assert_eq!(DISCOVERY_REPLY_CANONICAL_LEN, 24);
        match parse(&bytes).unwrap() {
            CiMessage::DiscoveryReply { partial, .. } => assert!(!partial),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn round_trips_invalidate_muid() {
        let msg = CiMessage::InvalidateMuid {
            source: Muid::from_raw(1),
            destination: Muid::broadcast(),
            target: Muid::from_raw(0x76_5432),
        };
        let bytes = build(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn round_trips_nak() {
        let msg = CiMessage::Nak {
            source: Muid::from_raw(9),
            destination: Muid::from_raw(1),
            original_sub_id: SUB_ID_PE_GET_INQUIRY,
            status_code: 64,
        };
        let bytes = build(&msg);
        assert_eq!(parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn round_trips_pe_inquiry_for_every_kind() {
        for kind in [PeInquiryKind::Get, PeInquiryKind::Set, PeInquiryKind::Subscribe] {
            let msg = CiMessage::PeInquiry {
                kind,
                source: Muid::from_raw(1),
                destination: Muid::from_raw(2),
                request_id: 5,
                header: br#"{"resource":"DeviceInfo"}"#.to_vec(),
            };
            let bytes = build(&msg);
            assert_eq!(parse(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn round_trips_pe_reply_for_every_kind() {
        for kind in [
            PeReplyKind::GetReply,
            PeReplyKind::SetReply,
            PeReplyKind::SubscribeReply,
            PeReplyKind::Notify,
        ] {
            let msg = CiMessage::PeReply {
                kind,
                source: Muid::from_raw(2),
                destination: Muid::from_raw(1),
                request_id: 5,
                header: br#"{"status":200}"#.to_vec(),
                num_chunks: 1,
                this_chunk: 1,
                body: br#"{"productName":"Demo"}"#.to_vec(),
            };
            let bytes = build(&msg);
            assert_eq!(parse(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn inquiry_layout_has_no_chunk_fields() {
        let msg = CiMessage::PeInquiry {
            kind: PeInquiryKind::Get,
            source: Muid::from_raw(1),
            destination: Muid::from_raw(2),
            request_id: 0,
            header: br#"{"resource":"DeviceInfo"}"#.to_vec(),
        };
        let bytes = build(&msg);
        // header(4) + sub_id + version + src(4) + dst(4) = 14 fixed bytes,
        // then requestID(1) + headerLen(2) + header, then F7.
        let payload = &bytes[14..bytes.len() - 1];
        let header_len = payload.len() - 3;
        assert_eq!(payload[0], 0);
        assert_eq!(header_len, br#"{"resource":"DeviceInfo"}"#.len());
    }

    #[test]
    fn rejects_extra_bytes_in_inquiry_payload() {
        let msg = CiMessage::PeInquiry {
            kind: PeInquiryKind::Get,
            source: Muid::from_raw(1),
            destination: Muid::from_raw(2),
            request_id: 0,
            header: b"{}".to_vec(),
        };
        let mut bytes = build(&msg);
        // Splice in bogus extra bytes before the terminator, simulating a
        // reply-shaped payload sent where an inquiry is expected.
        let term = bytes.pop().unwrap();
        bytes.push(0x01);
        bytes.push(0x00);
        bytes.push(term);
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::InquiryCarriesChunkFields));
    }

    #[test]
    fn accepts_partial_discovery_reply_with_only_identity() {
        let mut bytes = vec![
            SYSEX_START,
            UNIVERSAL_NON_REALTIME,
            DEVICE_ID_BROADCAST,
            CI_SUB_ID_1,
            SUB_ID_DISCOVERY_REPLY,
            CI_VERSION,
        ];
        bytes.extend_from_slice(&Muid::from_raw(1).to_bytes());
        bytes.extend_from_slice(&Muid::from_raw(2).to_bytes());
        bytes.extend_from_slice(&sample_identity().to_bytes());
        bytes.push(SYSEX_END);
        let parsed = parse(&bytes).unwrap();
        match parsed {
            CiMessage::DiscoveryReply {
                partial, identity, ..
            } => {
                assert!(partial);
                assert_eq!(identity, sample_identity());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_discovery_reply_shorter_than_identity() {
        let mut bytes = vec![
            SYSEX_START,
            UNIVERSAL_NON_REALTIME,
            DEVICE_ID_BROADCAST,
            CI_SUB_ID_1,
            SUB_ID_DISCOVERY_REPLY,
            CI_VERSION,
        ];
        bytes.extend_from_slice(&Muid::from_raw(1).to_bytes());
        bytes.extend_from_slice(&Muid::from_raw(2).to_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.push(SYSEX_END);
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::IdentityTooShort));
    }

    #[test]
    fn rejects_missing_sysex_terminator() {
        let mut bytes = build(&CiMessage::InvalidateMuid {
            source: Muid::from_raw(1),
            destination: Muid::broadcast(),
            target: Muid::from_raw(2),
        });
        bytes.pop();
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unterminated));
    }
}
