//! The peer registry: deterministic, synchronous state tracking for
//! discovered devices.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ci_codec::{DeviceIdentity, Muid};
use ci_transport::EndpointId;

pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(60);

/// One discovered CI participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub muid: Muid,
    pub identity: DeviceIdentity,
    pub category_support: u8,
    pub max_sysex_size: u32,
    pub source_hint: Option<EndpointId>,
    pub partial_discovery: bool,
    pub last_seen: Instant,
}

/// What changed as a result of processing one Discovery Reply (or, when
/// permissive mode is enabled, Discovery Inquiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Discovered,
    Updated,
}

/// Owns the set of live peers exclusively. External observers only ever
/// see immutable `Peer` snapshots via `snapshot`.
pub struct PeerRegistry {
    peers: HashMap<Muid, Peer>,
    device_timeout: Duration,
}

impl PeerRegistry {
    pub fn new(device_timeout: Duration) -> Self {
        PeerRegistry {
            peers: HashMap::new(),
            device_timeout,
        }
    }

    /// Record (or refresh) a peer from a Discovery Reply / permissive
    /// Inquiry.
    pub fn upsert(
        &mut self,
        muid: Muid,
        identity: DeviceIdentity,
        category_support: u8,
        max_sysex_size: u32,
        source_hint: Option<EndpointId>,
        partial_discovery: bool,
        now: Instant,
    ) -> (UpsertOutcome, Peer) {
        let outcome = if self.peers.contains_key(&muid) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Discovered
        };
        let peer = Peer {
            muid,
            identity,
            category_support,
            max_sysex_size,
            source_hint,
            partial_discovery,
            last_seen: now,
        };
        self.peers.insert(muid, peer.clone());
        (outcome, peer)
    }

    pub fn remove(&mut self, muid: Muid) -> Option<Peer> {
        self.peers.remove(&muid)
    }

    pub fn get(&self, muid: Muid) -> Option<&Peer> {
        self.peers.get(&muid)
    }

    /// Remove and return every peer whose last-seen age exceeds the
    /// configured device timeout.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<Peer> {
        let expired: Vec<Muid> = self
            .peers
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) > self.device_timeout)
            .map(|(muid, _)| *muid)
            .collect();
        expired
            .into_iter()
            .filter_map(|muid| self.peers.remove(&muid))
            .collect()
    }

    /// Immutable snapshot of every currently live peer.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn clear(&mut self) -> Vec<Peer> {
        self.peers.drain().map(|(_, p)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_codec::identity::ManufacturerId;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: ManufacturerId::Standard(0x42),
            family: 4,
            model: 1,
            version: 1,
        }
    }

    #[test]
    fn first_reply_creates_a_new_peer() {
        let mut reg = PeerRegistry::new(DEFAULT_DEVICE_TIMEOUT);
        let now = Instant::now();
        let (outcome, peer) = reg.upsert(Muid::from_raw(1), identity(), 0x7F, 512, None, false, now);
        assert_eq!(outcome, UpsertOutcome::Discovered);
        assert_eq!(peer.muid, Muid::from_raw(1));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn second_reply_from_same_muid_updates_in_place() {
        let mut reg = PeerRegistry::new(DEFAULT_DEVICE_TIMEOUT);
        let now = Instant::now();
        reg.upsert(Muid::from_raw(1), identity(), 0x7F, 512, None, false, now);
        let (outcome, _) = reg.upsert(Muid::from_raw(1), identity(), 0x7F, 1024, None, false, now);
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(Muid::from_raw(1)).unwrap().max_sysex_size, 1024);
    }

    #[test]
    fn sweep_removes_peers_past_the_device_timeout() {
        let mut reg = PeerRegistry::new(Duration::from_millis(10));
        let now = Instant::now();
        reg.upsert(Muid::from_raw(1), identity(), 0x7F, 512, None, false, now);
        let later = now + Duration::from_millis(11);
        let lost = reg.sweep_expired(later);
        assert_eq!(lost.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_leaves_fresh_peers_alone() {
        let mut reg = PeerRegistry::new(Duration::from_secs(60));
        let now = Instant::now();
        reg.upsert(Muid::from_raw(1), identity(), 0x7F, 512, None, false, now);
        let soon = now + Duration::from_millis(1);
        assert!(reg.sweep_expired(soon).is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut reg = PeerRegistry::new(DEFAULT_DEVICE_TIMEOUT);
        let now = Instant::now();
        reg.upsert(Muid::from_raw(1), identity(), 0x7F, 512, None, false, now);
        let snap = reg.snapshot();
        reg.remove(Muid::from_raw(1));
        assert_eq!(snap.len(), 1);
        assert!(reg.is_empty());
    }
}
