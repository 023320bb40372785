//! Warm-up policy: issuing a small stabilising request before a real
//! multi-chunk PE request on links that drop the first large transfer.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ci_codec::identity::ManufacturerId;

use crate::send_strategy::SendStrategy;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpPolicy {
    Always,
    Never,
    Adaptive,
    VendorBased,
}

/// Identifies a device independent of its (session-scoped, rotating) MUID,
/// so adaptive learning survives a rediscovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WarmUpKey {
    pub manufacturer: ManufacturerId,
    pub model: u16,
}

/// What a vendor-specific warm-up should request instead of the generic
/// DeviceInfo probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorWarmUpRule {
    pub resource: String,
}

#[derive(Debug, Clone, Default)]
pub struct VendorTable(HashMap<ManufacturerId, VendorWarmUpRule>);

impl VendorTable {
    pub fn new() -> Self {
        VendorTable(HashMap::new())
    }

    pub fn insert(&mut self, manufacturer: ManufacturerId, rule: VendorWarmUpRule) {
        self.0.insert(manufacturer, rule);
    }

    pub fn get(&self, manufacturer: &ManufacturerId) -> Option<&VendorWarmUpRule> {
        self.0.get(manufacturer)
    }
}

struct CacheEntry {
    expiry: Instant,
}

/// Remembers which devices need a warm-up, keyed by manufacturer+model with
/// TTL expiry and oldest-first eviction once `max_size` is exceeded.
pub struct WarmUpCache {
    entries: HashMap<WarmUpKey, CacheEntry>,
    order: VecDeque<WarmUpKey>,
    ttl: Duration,
    max_size: usize,
}

impl WarmUpCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        WarmUpCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_size,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        let expired: Vec<WarmUpKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expiry <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            self.entries.remove(&key);
            self.order.retain(|k| k != &key);
        }
    }

    pub fn remember(&mut self, key: WarmUpKey, now: Instant) {
        self.evict_expired(now);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                expiry: now + self.ttl,
            },
        );
        self.order.retain(|k| k != &key);
        self.order.push_back(key);
    }

    pub fn needs_warmup(&mut self, key: WarmUpKey, now: Instant) -> bool {
        self.evict_expired(now);
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What to do before issuing the real request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUpDecision {
    Skip,
    /// `None` means the generic single-chunk DeviceInfo probe; `Some`
    /// names a vendor-specific resource to request instead.
    WarmUpThenRequest { resource: Option<String> },
}

/// Decide whether to warm up before the real request. `previously_timed_out`
/// lets `adaptive` learn from the caller's last attempt at this device.
pub fn decide(
    policy: WarmUpPolicy,
    key: WarmUpKey,
    vendor_table: &VendorTable,
    cache: &mut WarmUpCache,
    now: Instant,
    previously_timed_out: bool,
) -> WarmUpDecision {
    let decision = match policy {
        WarmUpPolicy::Always => WarmUpDecision::WarmUpThenRequest { resource: None },
        WarmUpPolicy::Never => WarmUpDecision::Skip,
        WarmUpPolicy::Adaptive => {
            if cache.needs_warmup(key, now) {
                WarmUpDecision::WarmUpThenRequest { resource: None }
            } else if previously_timed_out {
                tracing::debug!(model = key.model, "adaptive warm-up learned from prior timeout");
                cache.remember(key, now);
                WarmUpDecision::WarmUpThenRequest { resource: None }
            } else {
                WarmUpDecision::Skip
            }
        }
        WarmUpPolicy::VendorBased => match vendor_table.get(&key.manufacturer) {
            Some(rule) => WarmUpDecision::WarmUpThenRequest {
                resource: Some(rule.resource.clone()),
            },
            None => WarmUpDecision::Skip,
        },
    };
    tracing::debug!(model = key.model, ?decision, "warm-up decision");
    decision
}

/// `warmUpStrategy=vendorBased` dominates `peSendStrategy=broadcast`: the
/// warm-up probe itself always goes out `single`, even when the real
/// request that follows it will broadcast. Warm-up exists to stabilise one
/// specific link; broadcasting it would defeat the purpose.
pub fn warmup_send_strategy(real_strategy: SendStrategy, warmup_policy: WarmUpPolicy) -> SendStrategy {
    if warmup_policy == WarmUpPolicy::VendorBased {
        SendStrategy::Single
    } else {
        real_strategy
    }
}
