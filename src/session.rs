//! The session loop: the single place that owns a transport, drives the
//! discovery broadcast tick, and classifies every inbound SysEx between
//! the discovery engine and the transaction engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ci_codec::{build as build_sysex, identity::DeviceIdentity, CiMessage, Muid};
use ci_discovery::{DiscoveryEngine, DiscoveryEvent};
use ci_route::Destination;
use ci_transaction::{PeResponse, SubscriptionHandle, TransactionEngine, TransactionError};
use ci_transport::{EndpointId, Transport, TransportError};
use futures::StreamExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::CoreError;

pub struct Session<T: Transport> {
    transport: Arc<T>,
    discovery: AsyncMutex<DiscoveryEngine>,
    transaction: Arc<TransactionEngine<T>>,
    local_muid: Muid,
    identity: DeviceIdentity,
    category_support: u8,
    max_sysex_size: u32,
    shutdown_tx: watch::Sender<bool>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>, local_muid: Muid, config: SessionConfig) -> Self {
        let discovery = DiscoveryEngine::new(config.discovery);
        let transaction = Arc::new(TransactionEngine::new(
            transport.clone(),
            local_muid,
            config.transaction,
            config.vendor_table,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Session {
            transport,
            discovery: AsyncMutex::new(discovery),
            transaction,
            local_muid,
            identity: config.local_identity,
            category_support: config.category_support,
            max_sysex_size: config.max_sysex_size,
            shutdown_tx,
        }
    }

    pub fn local_muid(&self) -> Muid {
        self.local_muid
    }

    pub fn transactions(&self) -> &Arc<TransactionEngine<T>> {
        &self.transaction
    }

    pub async fn subscribe_discovery_events(&self) -> ci_hub::Subscription<DiscoveryEvent> {
        self.discovery.lock().await.subscribe()
    }

    pub async fn discovered_peers(&self) -> Vec<ci_discovery::Peer> {
        self.discovery.lock().await.snapshot()
    }

    pub async fn set_destinations(&self, destinations: Vec<Destination>) {
        self.transaction.set_destinations(destinations).await;
    }

    /// Request shutdown; `run` returns `Ok(())` once it observes this.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn peer_hint(&self, device: Muid) -> (Option<DeviceIdentity>, Option<EndpointId>) {
        let discovery = self.discovery.lock().await;
        match discovery.peer(device) {
            Some(peer) => (Some(peer.identity), peer.source_hint),
            None => (None, None),
        }
    }

    pub async fn get(
        &self,
        resource: &str,
        device: Muid,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<PeResponse, CoreError> {
        let (identity, source_hint) = self.peer_hint(device).await;
        self.transaction
            .get(resource, device, identity, source_hint, source_name, timeout)
            .await
            .map_err(CoreError::from)
    }

    pub async fn set(
        &self,
        resource: &str,
        body: serde_json::Value,
        device: Muid,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<PeResponse, CoreError> {
        let (identity, source_hint) = self.peer_hint(device).await;
        self.transaction
            .set(resource, body, device, identity, source_hint, source_name, timeout)
            .await
            .map_err(CoreError::from)
    }

    pub async fn subscribe(
        &self,
        resource: &str,
        device: Muid,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<SubscriptionHandle, CoreError> {
        let (identity, source_hint) = self.peer_hint(device).await;
        self.transaction
            .subscribe(resource, device, identity, source_hint, source_name, timeout)
            .await
            .map_err(CoreError::from)
    }

    pub async fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
        device: Muid,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        let (_, source_hint) = self.peer_hint(device).await;
        self.transaction
            .unsubscribe(handle, device, source_hint, source_name, timeout)
            .await
            .map_err(CoreError::from)
    }

    pub fn notifications(&self) -> ci_hub::Subscription<ci_transaction::Notification> {
        self.transaction.notifications()
    }

    /// Drive the session: periodic discovery broadcast and inbound
    /// dispatch, until `shutdown` is called or the transport's `received`
    /// stream ends abnormally.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<(), CoreError> {
        {
            let discovery = self.discovery.lock().await;
            discovery.start();
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.broadcast_interval().await);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut received = self.transport.received();

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break Ok(());
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
                frame = received.next() => {
                    match frame {
                        None => {
                            warn!("transport's received stream ended; failing all pending transactions");
                            self.transaction
                                .fail_all_pending(TransactionError::Transport(TransportError::ShutDown))
                                .await;
                            break Err(CoreError::Transport(TransportError::ShutDown));
                        }
                        Some(frame) => self.handle_frame(frame.bytes, frame.source).await,
                    }
                }
            }
        };

        self.discovery.lock().await.stop();
        outcome
    }

    async fn broadcast_interval(&self) -> Duration {
        self.discovery.lock().await.broadcast_interval()
    }

    async fn on_tick(&self) {
        let now = Instant::now();
        let inquiry = DiscoveryEngine::build_inquiry(
            self.local_muid,
            self.identity,
            self.category_support,
            self.max_sysex_size,
        );
        if let Err(e) = self.transport.broadcast(build_sysex(&inquiry)).await {
            warn!(error = %e, "failed to broadcast discovery inquiry");
        }
        let lost = self.discovery.lock().await.sweep(now);
        if lost > 0 {
            debug!(lost, "aged out stale peers");
        }
        self.transaction.sweep(now).await;
    }

    async fn handle_frame(&self, bytes: Vec<u8>, source_hint: EndpointId) {
        let msg = match ci_codec::parse(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "dropping unparsable inbound SysEx");
                return;
            }
        };

        if msg.destination() != Muid::broadcast() && msg.destination() != self.local_muid {
            debug!(destination = %msg.destination(), "dropping message addressed to a different MUID");
            return;
        }

        let now = Instant::now();
        if self.transaction.handle_message(msg.clone(), now).await {
            return;
        }

        match msg {
            CiMessage::DiscoveryReply {
                source,
                identity,
                category_support,
                max_sysex_size,
                partial,
                ..
            } => {
                self.discovery.lock().await.handle_reply(
                    source,
                    identity,
                    category_support,
                    max_sysex_size,
                    Some(source_hint),
                    partial,
                    now,
                );
            }
            CiMessage::DiscoveryInquiry {
                source,
                identity,
                category_support,
                max_sysex_size,
                ..
            } => {
                self.discovery.lock().await.handle_inquiry_from_peer(
                    source,
                    identity,
                    category_support,
                    max_sysex_size,
                    Some(source_hint),
                    now,
                );
            }
            CiMessage::InvalidateMuid { target, .. } => {
                self.discovery.lock().await.handle_invalidate_muid(target);
            }
            _ => {}
        }
    }
}
