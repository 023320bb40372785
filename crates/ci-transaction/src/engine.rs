//! The Transaction Engine: get/set/subscribe/unsubscribe against a single
//! peer, built on the chunk assembler, request-ID pool, and route resolver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ci_chunk::{AssembleOutcome, ChunkAssembler, RequestIdPool};
use ci_codec::{build as build_sysex, CiMessage, DeviceIdentity, Muid, PeInquiryKind, PeReplyKind};
use ci_route::{
    decide_warmup, plan as plan_send, warmup_send_strategy, Destination, ResolveError, Resolver,
    SendStrategy, VendorTable, WarmUpCache, WarmUpDecision, WarmUpKey, WARMUP_DEFAULT_MAX_SIZE,
    WARMUP_DEFAULT_TTL,
};
use ci_transport::{EndpointId, Transport};
use serde_json::Map;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::config::TransactionConfig;
use crate::decode::{decode_pe_body, decode_pe_header, declared_encoding, status_of};
use crate::error::TransactionError;
use crate::inflight::InflightLimiter;
use crate::response::{Notification, PeResponse};
use crate::subscription::SubscriptionRegistry;

fn multi_chunk_hint(resource: &str) -> bool {
    resource.eq_ignore_ascii_case("ResourceList")
}

struct PendingEntry {
    sender: oneshot::Sender<Result<PeResponse, TransactionError>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: String,
}

pub struct TransactionEngine<T: Transport> {
    transport: Arc<T>,
    local_muid: Muid,
    config: TransactionConfig,
    id_pool: AsyncMutex<RequestIdPool>,
    assembler: AsyncMutex<ChunkAssembler>,
    pending: AsyncMutex<HashMap<u8, PendingEntry>>,
    resolver: AsyncMutex<Resolver>,
    destinations: AsyncMutex<Vec<Destination>>,
    inflight: Arc<InflightLimiter>,
    vendor_table: VendorTable,
    warmup_cache: AsyncMutex<WarmUpCache>,
    subscriptions: SubscriptionRegistry,
}

impl<T: Transport> TransactionEngine<T> {
    pub fn new(
        transport: Arc<T>,
        local_muid: Muid,
        config: TransactionConfig,
        vendor_table: VendorTable,
    ) -> Self {
        let inflight = InflightLimiter::new(config.max_inflight_per_device);
        let resolver = Resolver::new(config.destination_strategy.clone(), config.destination_cache_ttl);
        let id_pool = RequestIdPool::new(config.request_id_cooldown);
        let assembler = ChunkAssembler::new(config.max_body_size);
        TransactionEngine {
            transport,
            local_muid,
            id_pool: AsyncMutex::new(id_pool),
            assembler: AsyncMutex::new(assembler),
            pending: AsyncMutex::new(HashMap::new()),
            resolver: AsyncMutex::new(resolver),
            destinations: AsyncMutex::new(Vec::new()),
            inflight,
            vendor_table,
            warmup_cache: AsyncMutex::new(WarmUpCache::new(WARMUP_DEFAULT_TTL, WARMUP_DEFAULT_MAX_SIZE)),
            subscriptions: SubscriptionRegistry::new(),
            config,
        }
    }

    pub async fn set_destinations(&self, destinations: Vec<Destination>) {
        *self.destinations.lock().await = destinations;
    }

    pub fn notifications(&self) -> ci_hub::Subscription<Notification> {
        self.subscriptions.subscribe_stream()
    }

    /// Reclaim chunk-assembler entries whose deadline passed without ever
    /// completing. Pending callers still terminate on their own
    /// `tokio::time::timeout`; this just frees assembler state for
    /// transactions that will never see another chunk.
    pub async fn sweep(&self, now: Instant) {
        let expired = self.assembler.lock().await.sweep_expired(now);
        for (request_id, _partial) in expired {
            tracing::debug!(request_id, "swept expired chunk assembly");
        }
    }

    /// Fail every currently pending transaction with `error`, for use when
    /// the underlying transport has failed or the session is stopping.
    pub async fn fail_all_pending(&self, error: TransactionError) {
        let entries: Vec<PendingEntry> = self.pending.lock().await.drain().map(|(_, v)| v).collect();
        for entry in entries {
            let _ = entry.sender.send(Err(error.clone()));
        }
    }

    #[tracing::instrument(skip(self, identity))]
    pub async fn get(
        &self,
        resource: &str,
        device: Muid,
        identity: Option<DeviceIdentity>,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<PeResponse, TransactionError> {
        self.send_request(
            PeInquiryKind::Get,
            resource,
            Map::new(),
            device,
            identity,
            source_hint,
            source_name,
            timeout,
        )
        .await
    }

    #[tracing::instrument(skip(self, body, identity))]
    pub async fn set(
        &self,
        resource: &str,
        body: serde_json::Value,
        device: Muid,
        identity: Option<DeviceIdentity>,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<PeResponse, TransactionError> {
        let mut header_extra = Map::new();
        header_extra.insert("value".into(), body);
        self.send_request(
            PeInquiryKind::Set,
            resource,
            header_extra,
            device,
            identity,
            source_hint,
            source_name,
            timeout,
        )
        .await
    }

    #[tracing::instrument(skip(self, identity))]
    pub async fn subscribe(
        &self,
        resource: &str,
        device: Muid,
        identity: Option<DeviceIdentity>,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<SubscriptionHandle, TransactionError> {
        let response = self
            .send_request(
                PeInquiryKind::Subscribe,
                resource,
                Map::new(),
                device,
                identity,
                source_hint,
                source_name,
                timeout,
            )
            .await?;
        let id = response
            .body
            .get("subscribeId")
            .and_then(|v| v.as_str())
            .or_else(|| response.header.get("subscribeId").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .ok_or_else(|| TransactionError::Malformed("subscribe reply missing subscribeId".into()))?;
        self.subscriptions.register(id.clone());
        Ok(SubscriptionHandle { id })
    }

    #[tracing::instrument(skip(self))]
    pub async fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
        device: Muid,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<(), TransactionError> {
        let mut header_extra = Map::new();
        header_extra.insert("command".into(), serde_json::json!("end"));
        header_extra.insert("subscribeId".into(), serde_json::json!(handle.id));
        self.send_request(
            PeInquiryKind::Subscribe,
            "",
            header_extra,
            device,
            None,
            source_hint,
            source_name,
            timeout,
        )
        .await?;
        self.subscriptions.unregister(&handle.id);
        Ok(())
    }

    /// Feed one parsed inbound message to the engine. Returns `false` for
    /// message kinds this engine does not own (Discovery, InvalidateMuid),
    /// leaving those to the discovery engine.
    pub async fn handle_message(&self, msg: CiMessage, now: Instant) -> bool {
        match msg {
            CiMessage::PeReply {
                kind,
                request_id,
                header,
                num_chunks,
                this_chunk,
                body,
                ..
            } => {
                self.handle_pe_reply(kind, request_id, header, num_chunks, this_chunk, body, now)
                    .await;
                true
            }
            CiMessage::Nak { .. } => {
                tracing::debug!("received session-level NAK carrying no request ID; dropping");
                true
            }
            _ => false,
        }
    }

    async fn send_request(
        &self,
        kind: PeInquiryKind,
        resource: &str,
        header_extra: Map<String, serde_json::Value>,
        device: Muid,
        identity: Option<DeviceIdentity>,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        timeout_override: Option<Duration>,
    ) -> Result<PeResponse, TransactionError> {
        let _permit = self.inflight.clone().acquire(device).await;
        let base_timeout = timeout_override.unwrap_or(self.config.pe_timeout);
        let effective_timeout = if multi_chunk_hint(resource) {
            Duration::from_secs_f64(
                base_timeout.as_secs_f64() * self.config.multi_chunk_timeout_multiplier,
            )
        } else {
            base_timeout
        };

        if let Some(identity) = identity {
            self.maybe_warm_up(identity, device, source_hint, source_name, false)
                .await;
        }

        let result = self
            .dispatch_plan(
                kind,
                resource,
                header_extra.clone(),
                device,
                source_hint,
                source_name,
                effective_timeout,
            )
            .await;

        match (&result, identity) {
            (Err(TransactionError::Timeout), Some(identity))
                if self.config.warm_up_strategy == ci_route::WarmUpPolicy::Adaptive =>
            {
                self.maybe_warm_up(identity, device, source_hint, source_name, true)
                    .await;
                self.dispatch_plan(
                    kind,
                    resource,
                    header_extra,
                    device,
                    source_hint,
                    source_name,
                    effective_timeout,
                )
                .await
            }
            _ => result,
        }
    }

    async fn dispatch_plan(
        &self,
        kind: PeInquiryKind,
        resource: &str,
        header_extra: Map<String, serde_json::Value>,
        device: Muid,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        effective_timeout: Duration,
    ) -> Result<PeResponse, TransactionError> {
        let strategy = self.config.pe_send_strategy;
        let plan = self
            .compute_plan(strategy, device, source_hint, source_name)
            .await?;

        match strategy {
            SendStrategy::Fallback => {
                let first = *plan
                    .destinations
                    .first()
                    .ok_or(ResolveError::DestinationUnresolved(device))?;
                let first_result = self
                    .attempt_once(kind, resource, header_extra.clone(), device, &[first], effective_timeout, false)
                    .await;
                match first_result {
                    Err(TransactionError::Timeout) if plan.destinations.len() > 1 => {
                        let second = plan.destinations[1];
                        let retry_result = self
                            .attempt_once(kind, resource, header_extra, device, &[second], effective_timeout, false)
                            .await;
                        if retry_result.is_ok() && plan.remember_on_retry_success {
                            self.resolver
                                .lock()
                                .await
                                .record_success(device, second, Instant::now());
                        }
                        retry_result
                    }
                    other => other,
                }
            }
            SendStrategy::Broadcast => {
                self.attempt_once(
                    kind,
                    resource,
                    header_extra,
                    device,
                    &plan.destinations,
                    effective_timeout,
                    true,
                )
                .await
            }
            _ => {
                self.attempt_once(
                    kind,
                    resource,
                    header_extra,
                    device,
                    &plan.destinations,
                    effective_timeout,
                    false,
                )
                .await
            }
        }
    }

    async fn compute_plan(
        &self,
        strategy: SendStrategy,
        device: Muid,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
    ) -> Result<ci_route::SendPlan, TransactionError> {
        let dest_descs = self.destinations.lock().await.clone();
        let all_ids: Vec<EndpointId> = dest_descs.iter().map(|d| d.id).collect();
        let mut resolver = self.resolver.lock().await;
        Ok(plan_send(
            strategy,
            &mut resolver,
            device,
            source_hint,
            source_name,
            &dest_descs,
            &all_ids,
            Instant::now(),
        )?)
    }

    async fn attempt_once(
        &self,
        kind: PeInquiryKind,
        resource: &str,
        mut header_extra: Map<String, serde_json::Value>,
        device: Muid,
        destinations: &[EndpointId],
        timeout: Duration,
        use_broadcast_call: bool,
    ) -> Result<PeResponse, TransactionError> {
        if destinations.is_empty() {
            return Err(ResolveError::DestinationUnresolved(device).into());
        }

        let request_id = {
            let mut pool = self.id_pool.lock().await;
            pool.acquire(Instant::now())?
        };
        {
            let mut assembler = self.assembler.lock().await;
            assembler.register(request_id, Instant::now(), self.config.chunk_assembly_timeout);
        }
        let (tx, rx) = oneshot::channel();
        {
            self.pending
                .lock()
                .await
                .insert(request_id, PendingEntry { sender: tx });
        }

        header_extra.insert("resource".into(), serde_json::json!(resource));
        let header_bytes = serde_json::to_vec(&header_extra).unwrap_or_default();
        let msg = CiMessage::PeInquiry {
            kind,
            source: self.local_muid,
            destination: device,
            request_id,
            header: header_bytes,
        };
        let bytes = build_sysex(&msg);

        let send_result = if use_broadcast_call {
            self.transport.broadcast(bytes).await
        } else {
            let mut result = Ok(());
            for &dest in destinations {
                result = self.transport.send(bytes.clone(), dest).await;
                if result.is_err() {
                    break;
                }
            }
            result
        };
        if let Err(e) = send_result {
            self.cleanup(request_id).await;
            return Err(TransactionError::from(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                self.pending.lock().await.remove(&request_id);
                self.id_pool.lock().await.release(request_id, Instant::now());
                result
            }
            Ok(Err(_)) => {
                self.cleanup(request_id).await;
                Err(TransactionError::Cancelled)
            }
            Err(_) => {
                self.cleanup(request_id).await;
                Err(TransactionError::Timeout)
            }
        }
    }

    async fn cleanup(&self, request_id: u8) {
        self.pending.lock().await.remove(&request_id);
        self.assembler.lock().await.cancel(request_id);
        self.id_pool.lock().await.release(request_id, Instant::now());
    }

    async fn maybe_warm_up(
        &self,
        identity: DeviceIdentity,
        device: Muid,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        previously_timed_out: bool,
    ) {
        let key = WarmUpKey {
            manufacturer: identity.manufacturer,
            model: identity.model,
        };
        let decision = {
            let mut cache = self.warmup_cache.lock().await;
            decide_warmup(
                self.config.warm_up_strategy,
                key,
                &self.vendor_table,
                &mut cache,
                Instant::now(),
                previously_timed_out,
            )
        };
        let WarmUpDecision::WarmUpThenRequest { resource } = decision else {
            return;
        };
        let warm_resource = resource.unwrap_or_else(|| "DeviceInfo".to_string());
        let warm_strategy = warmup_send_strategy(self.config.pe_send_strategy, self.config.warm_up_strategy);
        if let Ok(plan) = self.compute_plan(warm_strategy, device, source_hint, source_name).await {
            let broadcast = matches!(warm_strategy, SendStrategy::Broadcast);
            let _ = self
                .attempt_once(
                    PeInquiryKind::Get,
                    &warm_resource,
                    Map::new(),
                    device,
                    &plan.destinations,
                    self.config.pe_timeout,
                    broadcast,
                )
                .await;
        }
    }

    async fn handle_pe_reply(
        &self,
        kind: PeReplyKind,
        request_id: u8,
        header: Vec<u8>,
        num_chunks: u16,
        this_chunk: u16,
        body: Vec<u8>,
        now: Instant,
    ) {
        if kind == PeReplyKind::Notify {
            self.handle_notify(header, body).await;
            return;
        }

        let outcome = {
            let mut assembler = self.assembler.lock().await;
            assembler.add_chunk(now, request_id, this_chunk, num_chunks, header, body)
        };

        let completion: Option<Result<PeResponse, TransactionError>> = match outcome {
            Ok(AssembleOutcome::Incomplete) => None,
            Ok(AssembleOutcome::UnknownRequestId) => {
                tracing::debug!(request_id, "dropping chunk for unknown request ID");
                None
            }
            Ok(AssembleOutcome::Timeout { .. }) => Some(Err(TransactionError::Timeout)),
            Ok(AssembleOutcome::Complete { header, body }) => {
                Some(self.finish_complete(header, body))
            }
            Err(e) => Some(Err(TransactionError::from(e))),
        };

        let Some(result) = completion else { return };

        if kind == PeReplyKind::SubscribeReply {
            if let Ok(response) = &result {
                let id = response
                    .body
                    .get("subscribeId")
                    .and_then(|v| v.as_str())
                    .or_else(|| response.header.get("subscribeId").and_then(|v| v.as_str()));
                if let Some(id) = id {
                    self.subscriptions.register(id.to_string());
                }
            }
        }

        let sender = self.pending.lock().await.remove(&request_id);
        if let Some(entry) = sender {
            let _ = entry.sender.send(result);
        }
    }

    fn finish_complete(&self, header: Vec<u8>, body: Vec<u8>) -> Result<PeResponse, TransactionError> {
        let header_json = decode_pe_header(&header)?;
        let encoding = declared_encoding(&header_json);
        let status = status_of(&header_json);
        let body_json = decode_pe_body(encoding, &body)?;
        if status >= 400 {
            let details = body_json
                .as_str()
                .map(|s| s.to_string())
                .or_else(|| Some(body_json.to_string()));
            return Err(TransactionError::Nak { status, details });
        }
        Ok(PeResponse {
            status,
            header: header_json,
            body: body_json,
        })
    }

    async fn handle_notify(&self, header: Vec<u8>, body: Vec<u8>) {
        let Ok(header_json) = decode_pe_header(&header) else {
            return;
        };
        let encoding = declared_encoding(&header_json);
        let Ok(body_json) = decode_pe_body(encoding, &body) else {
            return;
        };
        let subscribe_id = header_json
            .get("subscribeId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if subscribe_id.is_empty() || !self.subscriptions.is_active(&subscribe_id) {
            tracing::debug!(subscribe_id, "dropping notification for inactive subscription");
            return;
        }
        let resource = header_json
            .get("resource")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.subscriptions.publish(Notification {
            subscribe_id,
            resource,
            body: body_json,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_codec::{encode_body, PeReplyKind as RK};
    use ci_transport::fake::{FakeTransport, SentFrame};

    fn engine(transport: Arc<FakeTransport>) -> TransactionEngine<FakeTransport> {
        TransactionEngine::new(
            transport,
            Muid::from_raw(0x0123_4567),
            TransactionConfig {
                pe_send_strategy: SendStrategy::Single,
                ..Default::default()
            },
            VendorTable::new(),
        )
    }

    async fn reply_to_first_sent(transport: &FakeTransport, engine: &TransactionEngine<FakeTransport>, status: u16, body: serde_json::Value) {
        let sent = transport.sent_frames();
        let bytes = match sent.last().unwrap() {
            SentFrame::Unicast { bytes, .. } => bytes.clone(),
            SentFrame::Broadcast { bytes } => bytes.clone(),
        };
        let parsed = ci_codec::parse(&bytes).unwrap();
        let request_id = match parsed {
            CiMessage::PeInquiry { request_id, .. } => request_id,
            _ => panic!("expected PeInquiry"),
        };
        let raw_body = serde_json::to_vec(&body).unwrap();
        let header = serde_json::json!({"status": status});
        let reply = CiMessage::PeReply {
            kind: RK::GetReply,
            source: Muid::from_raw(0x7654_3210),
            destination: Muid::from_raw(0x0123_4567),
            request_id,
            header: serde_json::to_vec(&header).unwrap(),
            num_chunks: 1,
            this_chunk: 1,
            body: raw_body,
        };
        engine.handle_message(reply, Instant::now()).await;
    }

    #[tokio::test]
    async fn get_single_chunk_success_roundtrips_body() {
        let transport = Arc::new(FakeTransport::new(vec![], vec![EndpointId(1)]));
        let eng = engine(transport.clone());
        eng.set_destinations(vec![Destination {
            id: EndpointId(1),
            name: "Module".into(),
        }])
        .await;

        let eng_ref = &eng;
        let fut = eng_ref.get("DeviceInfo", Muid::from_raw(0x7654_3210), None, None, None, None);
        tokio::pin!(fut);
        tokio::select! {
            _ = &mut fut => panic!("should not resolve before a reply is injected"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
        reply_to_first_sent(&transport, &eng, 200, serde_json::json!({"productName": "Demo"})).await;
        let response = fut.await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["productName"], "Demo");
    }

    #[tokio::test]
    async fn nak_status_surfaces_as_nak_error() {
        let transport = Arc::new(FakeTransport::new(vec![], vec![EndpointId(1)]));
        let eng = engine(transport.clone());
        eng.set_destinations(vec![Destination {
            id: EndpointId(1),
            name: "Module".into(),
        }])
        .await;

        let fut = eng.get("DeviceInfo", Muid::from_raw(0x7654_3210), None, None, None, None);
        tokio::pin!(fut);
        tokio::select! {
            _ = &mut fut => panic!("should not resolve yet"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
        reply_to_first_sent(&transport, &eng, 404, serde_json::json!("not found")).await;
        let err = fut.await.unwrap_err();
        assert!(matches!(err, TransactionError::Nak { status: 404, .. }));
    }

    #[tokio::test]
    async fn chunk_for_unknown_request_id_is_dropped_without_panicking() {
        let transport = Arc::new(FakeTransport::new(vec![], vec![EndpointId(1)]));
        let eng = engine(transport);
        let (encoding, wire) = encode_body(br#"{"a":1}"#).unwrap();
        let header = serde_json::json!({"status": 200, "mutualEncoding": encoding.as_header_str()});
        let msg = CiMessage::PeReply {
            kind: RK::GetReply,
            source: Muid::from_raw(1),
            destination: Muid::from_raw(0x0123_4567),
            request_id: 9,
            header: serde_json::to_vec(&header).unwrap(),
            num_chunks: 1,
            this_chunk: 1,
            body: wire,
        };
        assert!(eng.handle_message(msg, Instant::now()).await);
    }
}
