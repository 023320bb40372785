//! CI message classification and the PE sub-ID space.

use crate::identity::DeviceIdentity;
use crate::muid::Muid;

pub const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
pub const DEVICE_ID_BROADCAST: u8 = 0x7F;
pub const CI_SUB_ID_1: u8 = 0x0D;

pub const SUB_ID_DISCOVERY_INQUIRY: u8 = 0x70;
pub const SUB_ID_DISCOVERY_REPLY: u8 = 0x71;
pub const SUB_ID_INVALIDATE_MUID: u8 = 0x7E;
pub const SUB_ID_NAK: u8 = 0x7F;

pub const SUB_ID_PE_GET_INQUIRY: u8 = 0x34;
pub const SUB_ID_PE_GET_REPLY: u8 = 0x35;
pub const SUB_ID_PE_SET_INQUIRY: u8 = 0x36;
pub const SUB_ID_PE_SET_REPLY: u8 = 0x37;
pub const SUB_ID_PE_SUBSCRIBE_INQUIRY: u8 = 0x38;
pub const SUB_ID_PE_SUBSCRIBE_REPLY: u8 = 0x39;
pub const SUB_ID_PE_NOTIFY: u8 = 0x3F;

/// The CI protocol version byte this codec builds and expects.
pub const CI_VERSION: u8 = 0x02;

/// Identifies which PE inquiry kind a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeInquiryKind {
    Get,
    Set,
    Subscribe,
}

impl PeInquiryKind {
    pub fn sub_id(self) -> u8 {
        match self {
            PeInquiryKind::Get => SUB_ID_PE_GET_INQUIRY,
            PeInquiryKind::Set => SUB_ID_PE_SET_INQUIRY,
            PeInquiryKind::Subscribe => SUB_ID_PE_SUBSCRIBE_INQUIRY,
        }
    }
}

/// Identifies which PE reply/notification kind a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeReplyKind {
    GetReply,
    SetReply,
    SubscribeReply,
    Notify,
}

impl PeReplyKind {
    pub fn sub_id(self) -> u8 {
        match self {
            PeReplyKind::GetReply => SUB_ID_PE_GET_REPLY,
            PeReplyKind::SetReply => SUB_ID_PE_SET_REPLY,
            PeReplyKind::SubscribeReply => SUB_ID_PE_SUBSCRIBE_REPLY,
            PeReplyKind::Notify => SUB_ID_PE_NOTIFY,
        }
    }

    pub fn from_sub_id(sub_id: u8) -> Option<PeReplyKind> {
        match sub_id {
            SUB_ID_PE_GET_REPLY => Some(PeReplyKind::GetReply),
            SUB_ID_PE_SET_REPLY => Some(PeReplyKind::SetReply),
            SUB_ID_PE_SUBSCRIBE_REPLY => Some(PeReplyKind::SubscribeReply),
            SUB_ID_PE_NOTIFY => Some(PeReplyKind::Notify),
            _ => None,
        }
    }
}

/// A fully classified MIDI-CI message, envelope and payload together.
#[derive(Debug, Clone, PartialEq)]
pub enum CiMessage {
    DiscoveryInquiry {
        source: Muid,
        destination: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
    },
    DiscoveryReply {
        source: Muid,
        destination: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
        initiator_output_path_id: u8,
        function_block: u8,
        /// True when the payload was shorter than the 24-byte canonical
        /// form but still carried at least the 11-byte identity.
        partial: bool,
    },
    InvalidateMuid {
        source: Muid,
        destination: Muid,
        target: Muid,
    },
    Nak {
        source: Muid,
        destination: Muid,
        original_sub_id: u8,
        status_code: u8,
    },
    PeInquiry {
        kind: PeInquiryKind,
        source: Muid,
        destination: Muid,
        request_id: u8,
        header: Vec<u8>,
    },
    PeReply {
        kind: PeReplyKind,
        source: Muid,
        destination: Muid,
        request_id: u8,
        header: Vec<u8>,
        num_chunks: u16,
        this_chunk: u16,
        body: Vec<u8>,
    },
}

impl CiMessage {
    pub fn source(&self) -> Muid {
        match self {
            CiMessage::DiscoveryInquiry { source, .. }
            | CiMessage::DiscoveryReply { source, .. }
            | CiMessage::InvalidateMuid { source, .. }
            | CiMessage::Nak { source, .. }
            | CiMessage::PeInquiry { source, .. }
            | CiMessage::PeReply { source, .. } => *source,
        }
    }

    pub fn destination(&self) -> Muid {
        match self {
            CiMessage::DiscoveryInquiry { destination, .. }
            | CiMessage::DiscoveryReply { destination, .. }
            | CiMessage::InvalidateMuid { destination, .. }
            | CiMessage::Nak { destination, .. }
            | CiMessage::PeInquiry { destination, .. }
            | CiMessage::PeReply { destination, .. } => *destination,
        }
    }
}
