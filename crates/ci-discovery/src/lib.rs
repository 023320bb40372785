//! Peer discovery: tracking which CI participants are reachable, and the
//! Discovery Inquiry/Reply lifecycle that keeps that set current.

pub mod engine;
pub mod events;
pub mod registry;

pub use engine::{DiscoveryConfig, DiscoveryEngine, DEFAULT_BROADCAST_INTERVAL};
pub use events::DiscoveryEvent;
pub use registry::{Peer, PeerRegistry, UpsertOutcome, DEFAULT_DEVICE_TIMEOUT};
