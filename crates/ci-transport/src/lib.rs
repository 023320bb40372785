//! The transport adapter contract the core consumes. The OS-level MIDI
//! transport itself is an external collaborator; this crate only defines
//! the interface and, under `test-support`, an in-memory fake of it.

pub mod error;
#[cfg(feature = "test-support")]
pub mod fake;

use std::time::SystemTime;

use futures::stream::BoxStream;

pub use error::TransportError;

/// An opaque, session-scoped endpoint handle. No persistence across
/// process restarts is expected or provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub u32);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

/// One inbound frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub bytes: Vec<u8>,
    pub source: EndpointId,
    pub timestamp: SystemTime,
}

/// The transport's observable surface and control operations.
///
/// `received` and `setup_changed` are each consumed exactly once — by the
/// single dispatch loop and the single route-resolver setup watcher,
/// respectively. Fan-out to multiple interested parties happens downstream
/// through `ci_hub::Hub`, never by calling these methods more than once.
pub trait Transport: Send + Sync + 'static {
    /// The stream of inbound bytes. Ending without an explicit `shutdown`
    /// is treated by callers as a transport failure.
    fn received(&self) -> BoxStream<'static, ReceivedFrame>;

    /// Fires whenever the set of sources or destinations changes.
    fn setup_changed(&self) -> BoxStream<'static, ()>;

    fn sources(&self) -> Vec<EndpointId>;
    fn destinations(&self) -> Vec<EndpointId>;

    async fn send(&self, bytes: Vec<u8>, destination: EndpointId) -> Result<(), TransportError>;
    async fn broadcast(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn connect(&self, source: EndpointId) -> Result<(), TransportError>;
    async fn disconnect(&self, source: EndpointId) -> Result<(), TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError>;
}
