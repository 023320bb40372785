//! Orchestrates the peer registry and the discovery lifecycle event hub.
//! Periodic broadcasting and transport I/O are driven by the caller (see
//! `build_inquiry` and `broadcast_interval`); this engine only owns state.

use std::time::{Duration, Instant};

use ci_codec::{CiMessage, DeviceIdentity, Muid};
use ci_hub::{Hub, Subscription, DEFAULT_CAPACITY};
use ci_transport::EndpointId;

use crate::events::DiscoveryEvent;
use crate::registry::{Peer, PeerRegistry, UpsertOutcome, DEFAULT_DEVICE_TIMEOUT};

pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    pub broadcast_interval: Duration,
    pub device_timeout: Duration,
    /// Accept peers from a bare Discovery Inquiry from another initiator,
    /// not only from Discovery Replies (`registerFromInquiry`).
    pub permissive: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            device_timeout: DEFAULT_DEVICE_TIMEOUT,
            permissive: false,
        }
    }
}

pub struct DiscoveryEngine {
    registry: PeerRegistry,
    hub: Hub<DiscoveryEvent>,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        DiscoveryEngine {
            registry: PeerRegistry::new(config.device_timeout),
            hub: Hub::new(DEFAULT_CAPACITY),
            config,
        }
    }

    pub fn subscribe(&self) -> Subscription<DiscoveryEvent> {
        self.hub.subscribe()
    }

    pub fn start(&self) {
        self.hub.publish(DiscoveryEvent::DiscoveryStarted);
    }

    pub fn stop(&mut self) {
        self.registry.clear();
        self.hub.publish(DiscoveryEvent::DiscoveryStopped);
    }

    pub fn broadcast_interval(&self) -> Duration {
        self.config.broadcast_interval
    }

    /// Build the periodic Discovery Inquiry this session should broadcast.
    pub fn build_inquiry(
        local_muid: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
    ) -> CiMessage {
        CiMessage::DiscoveryInquiry {
            source: local_muid,
            destination: Muid::broadcast(),
            identity,
            category_support,
            max_sysex_size,
        }
    }

    fn upsert_and_notify(
        &mut self,
        muid: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
        source_hint: Option<EndpointId>,
        partial_discovery: bool,
        now: Instant,
    ) -> Peer {
        let (outcome, peer) = self.registry.upsert(
            muid,
            identity,
            category_support,
            max_sysex_size,
            source_hint,
            partial_discovery,
            now,
        );
        let event = match outcome {
            UpsertOutcome::Discovered => {
                tracing::debug!(?muid, "peer discovered");
                DiscoveryEvent::DeviceDiscovered(peer.clone())
            }
            UpsertOutcome::Updated => DiscoveryEvent::DeviceUpdated(peer.clone()),
        };
        self.hub.publish(event);
        peer
    }

    /// Process a Discovery Reply. Always accepted, regardless of the
    /// permissive flag.
    pub fn handle_reply(
        &mut self,
        muid: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
        source_hint: Option<EndpointId>,
        partial_discovery: bool,
        now: Instant,
    ) -> Peer {
        self.upsert_and_notify(
            muid,
            identity,
            category_support,
            max_sysex_size,
            source_hint,
            partial_discovery,
            now,
        )
    }

    /// Process a Discovery Inquiry from another initiator. Only takes
    /// effect when `permissive` is enabled; returns `None` otherwise.
    pub fn handle_inquiry_from_peer(
        &mut self,
        muid: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
        source_hint: Option<EndpointId>,
        now: Instant,
    ) -> Option<Peer> {
        if !self.config.permissive {
            return None;
        }
        Some(self.upsert_and_notify(
            muid,
            identity,
            category_support,
            max_sysex_size,
            source_hint,
            false,
            now,
        ))
    }

    pub fn handle_invalidate_muid(&mut self, target: Muid) {
        if self.registry.remove(target).is_some() {
            tracing::debug!(muid = ?target, "peer invalidated");
            self.hub.publish(DiscoveryEvent::DeviceLost(target));
        }
    }

    /// Age out peers past the device timeout, publishing `DeviceLost` for
    /// each. Returns how many peers were lost.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let lost = self.registry.sweep_expired(now);
        let count = lost.len();
        if count > 0 {
            tracing::debug!(count, "peer sweep aged out stale devices");
        }
        for peer in lost {
            self.hub.publish(DiscoveryEvent::DeviceLost(peer.muid));
        }
        count
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.registry.snapshot()
    }

    pub fn peer(&self, muid: Muid) -> Option<&Peer> {
        self.registry.get(muid)
    }
}
