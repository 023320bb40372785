//! Outbound send modes: how many destinations a PE inquiry is tried
//! against, and in what order.

use std::time::Instant;

use ci_codec::Muid;
use ci_transport::EndpointId;

use crate::destination::Destination;
use crate::error::ResolveError;
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStrategy {
    Single,
    Broadcast,
    Fallback,
    Learned,
}

/// The destinations to try, in order, and whether a successful send to a
/// non-primary entry should be written back to the resolver's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    pub destinations: Vec<EndpointId>,
    /// For `fallback`: remembered so the caller can call
    /// `Resolver::record_success` if the retry (index 1) succeeds.
    pub remember_on_retry_success: bool,
}

/// Build a send plan for `strategy`. `all_destinations` is the device's
/// full destination set, used only by `broadcast`.
pub fn plan(
    strategy: SendStrategy,
    resolver: &mut Resolver,
    muid: Muid,
    source_hint: Option<EndpointId>,
    source_name: Option<&str>,
    candidate_destinations: &[Destination],
    all_destinations: &[EndpointId],
    now: Instant,
) -> Result<SendPlan, ResolveError> {
    match strategy {
        SendStrategy::Single => {
            let diag = resolver.resolve(muid, source_hint, source_name, candidate_destinations, now);
            match diag.resolved {
                Some(d) => Ok(SendPlan {
                    destinations: vec![d],
                    remember_on_retry_success: false,
                }),
                None => Err(ResolveError::DestinationUnresolved(muid)),
            }
        }
        SendStrategy::Broadcast => {
            if all_destinations.is_empty() {
                return Err(ResolveError::DestinationUnresolved(muid));
            }
            Ok(SendPlan {
                destinations: all_destinations.to_vec(),
                remember_on_retry_success: false,
            })
        }
        SendStrategy::Fallback => {
            let diag = resolver.resolve(muid, source_hint, source_name, candidate_destinations, now);
            if diag.tried_order.is_empty() {
                return Err(ResolveError::DestinationUnresolved(muid));
            }
            Ok(SendPlan {
                destinations: diag.tried_order,
                remember_on_retry_success: true,
            })
        }
        SendStrategy::Learned => match resolver.cached_destination(muid, now) {
            Some(d) => Ok(SendPlan {
                destinations: vec![d],
                remember_on_retry_success: false,
            }),
            None => Err(ResolveError::NoLearnedDestination(muid)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::DestinationStrategy;
    use crate::resolver::{Resolver, DEFAULT_CACHE_TTL};

    fn dests() -> Vec<Destination> {
        vec![
            Destination {
                id: EndpointId(1),
                name: "Module".into(),
            },
            Destination {
                id: EndpointId(2),
                name: "Bluetooth".into(),
            },
        ]
    }

    #[test]
    fn single_strategy_plans_only_the_resolved_destination() {
        let mut r = Resolver::new(DestinationStrategy::PreferModule, DEFAULT_CACHE_TTL);
        let now = Instant::now();
        let p = plan(
            SendStrategy::Single,
            &mut r,
            Muid::from_raw(1),
            None,
            None,
            &dests(),
            &[EndpointId(1), EndpointId(2)],
            now,
        )
        .unwrap();
        assert_eq!(p.destinations, vec![EndpointId(1)]);
    }

    #[test]
    fn broadcast_strategy_plans_every_destination() {
        let mut r = Resolver::new(DestinationStrategy::PreferModule, DEFAULT_CACHE_TTL);
        let now = Instant::now();
        let p = plan(
            SendStrategy::Broadcast,
            &mut r,
            Muid::from_raw(1),
            None,
            None,
            &dests(),
            &[EndpointId(1), EndpointId(2)],
            now,
        )
        .unwrap();
        assert_eq!(p.destinations, vec![EndpointId(1), EndpointId(2)]);
    }

    #[test]
    fn fallback_strategy_plans_the_full_tried_order() {
        let mut r = Resolver::new(DestinationStrategy::PreferModule, DEFAULT_CACHE_TTL);
        let now = Instant::now();
        let p = plan(
            SendStrategy::Fallback,
            &mut r,
            Muid::from_raw(1),
            None,
            None,
            &dests(),
            &[EndpointId(1), EndpointId(2)],
            now,
        )
        .unwrap();
        assert_eq!(p.destinations, vec![EndpointId(1), EndpointId(2)]);
        assert!(p.remember_on_retry_success);
    }

    #[test]
    fn learned_strategy_fails_when_cache_is_empty() {
        let mut r = Resolver::new(DestinationStrategy::PreferModule, DEFAULT_CACHE_TTL);
        let now = Instant::now();
        let err = plan(
            SendStrategy::Learned,
            &mut r,
            Muid::from_raw(1),
            None,
            None,
            &dests(),
            &[],
            now,
        )
        .unwrap_err();
        assert_eq!(err, ResolveError::NoLearnedDestination(Muid::from_raw(1)));
    }

    #[test]
    fn learned_strategy_uses_only_the_cached_destination() {
        let mut r = Resolver::new(DestinationStrategy::PreferModule, DEFAULT_CACHE_TTL);
        let now = Instant::now();
        r.resolve(Muid::from_raw(1), None, None, &dests(), now);
        let p = plan(
            SendStrategy::Learned,
            &mut r,
            Muid::from_raw(1),
            None,
            None,
            &[],
            &[],
            now,
        )
        .unwrap();
        assert_eq!(p.destinations, vec![EndpointId(1)]);
    }
}
