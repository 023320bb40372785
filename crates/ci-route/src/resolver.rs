//! Cache-backed destination resolution.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ci_codec::Muid;
use ci_transport::EndpointId;

use crate::destination::{candidates, Destination, DestinationStrategy};

/// Default TTL a resolved destination stays cached for.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry {
    destination: EndpointId,
    expiry: Instant,
}

/// A snapshot of one resolution attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationDiagnostics {
    pub muid: Muid,
    pub tried_order: Vec<EndpointId>,
    pub resolved: Option<EndpointId>,
    pub from_cache: bool,
}

/// Resolves a MUID to a destination endpoint, caching successful choices.
pub struct Resolver {
    strategy: DestinationStrategy,
    cache: HashMap<Muid, CacheEntry>,
    ttl: Duration,
    last_diagnostics: HashMap<Muid, DestinationDiagnostics>,
}

impl Resolver {
    pub fn new(strategy: DestinationStrategy, ttl: Duration) -> Self {
        Resolver {
            strategy,
            cache: HashMap::new(),
            ttl,
            last_diagnostics: HashMap::new(),
        }
    }

    /// Run the resolution algorithm: return the cached destination if one
    /// is live, otherwise compute candidates per the configured strategy,
    /// cache the head, and record a diagnostics snapshot either way.
    pub fn resolve(
        &mut self,
        muid: Muid,
        source_hint: Option<EndpointId>,
        source_name: Option<&str>,
        destinations: &[Destination],
        now: Instant,
    ) -> DestinationDiagnostics {
        if let Some(entry) = self.cache.get(&muid) {
            if entry.expiry > now {
                let diag = DestinationDiagnostics {
                    muid,
                    tried_order: vec![entry.destination],
                    resolved: Some(entry.destination),
                    from_cache: true,
                };
                self.last_diagnostics.insert(muid, diag.clone());
                return diag;
            }
        }

        let tried_order = candidates(&self.strategy, source_hint, source_name, destinations);
        let resolved = tried_order.first().copied();
        match resolved {
            Some(destination) => {
                self.cache.insert(
                    muid,
                    CacheEntry {
                        destination,
                        expiry: now + self.ttl,
                    },
                );
            }
            None => tracing::debug!(?muid, "no destination candidates resolved"),
        }
        let diag = DestinationDiagnostics {
            muid,
            tried_order,
            resolved,
            from_cache: false,
        };
        self.last_diagnostics.insert(muid, diag.clone());
        diag
    }

    /// Overwrite the cache entry for `muid`, used by the `fallback` send
    /// strategy once a retry destination succeeds.
    pub fn record_success(&mut self, muid: Muid, destination: EndpointId, now: Instant) {
        tracing::debug!(?muid, ?destination, "fallback retry succeeded, recaching destination");
        self.cache.insert(
            muid,
            CacheEntry {
                destination,
                expiry: now + self.ttl,
            },
        );
    }

    pub fn cached_destination(&self, muid: Muid, now: Instant) -> Option<EndpointId> {
        self.cache
            .get(&muid)
            .filter(|e| e.expiry > now)
            .map(|e| e.destination)
    }

    /// Drop the cache entry for a device that has been lost.
    pub fn invalidate(&mut self, muid: Muid) {
        self.cache.remove(&muid);
        self.last_diagnostics.remove(&muid);
    }

    pub fn diagnostics(&self, muid: Muid) -> Option<&DestinationDiagnostics> {
        self.last_diagnostics.get(&muid)
    }
}
