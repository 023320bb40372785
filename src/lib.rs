//! A MIDI-CI / Property Exchange core engine: SysEx framing and codec,
//! chunked PE transactions, peer discovery, and destination routing,
//! composed behind a single [`Session`].
//!
//! This crate owns protocol and transaction logic only. It is transport-
//! agnostic (see [`ci_transport::Transport`]) and carries no persistence,
//! UI, or configuration-file loading — those belong to the embedding
//! application.

pub mod config;
pub mod error;
pub mod retry;
pub mod session;

pub use config::SessionConfig;
pub use error::CoreError;
pub use retry::with_retry;
pub use session::Session;

pub use ci_chunk::{AssembleOutcome, ChunkAssembler, ChunkError, PoolError, RequestIdPool};
pub use ci_codec::{
    build as build_sysex, parse as parse_sysex, CiMessage, DeviceIdentity, ManufacturerId, Muid,
    MutualEncoding, PeInquiryKind, PeReplyKind,
};
pub use ci_discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, Peer};
pub use ci_route::{
    Destination, DestinationStrategy, ResolveError, Resolver, SendStrategy, VendorTable,
    VendorWarmUpRule, WarmUpPolicy,
};
pub use ci_transaction::{Notification, PeResponse, SubscriptionHandle, TransactionConfig, TransactionError};
pub use ci_transport::{EndpointId, ReceivedFrame, Transport, TransportError};
