use crate::registry::Peer;
use ci_codec::Muid;

/// Discovery lifecycle events, broadcast on a `ci_hub::Hub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DiscoveryStarted,
    DeviceDiscovered(Peer),
    DeviceUpdated(Peer),
    DeviceLost(Muid),
    DiscoveryStopped,
}
