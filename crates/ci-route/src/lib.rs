//! Destination selection: which of a device's several endpoints a PE
//! request should actually be sent to, with caching, fallback, and
//! link-stabilising warm-up requests.

pub mod destination;
pub mod error;
pub mod resolver;
pub mod send_strategy;
pub mod warmup;

pub use destination::{candidates, Destination, DestinationStrategy};
pub use error::ResolveError;
pub use resolver::{DestinationDiagnostics, Resolver, DEFAULT_CACHE_TTL};
pub use send_strategy::{plan, SendPlan, SendStrategy};
pub use warmup::{
    decide as decide_warmup, warmup_send_strategy, VendorTable, VendorWarmUpRule, WarmUpCache,
    WarmUpDecision, WarmUpKey, WarmUpPolicy, DEFAULT_MAX_SIZE as WARMUP_DEFAULT_MAX_SIZE,
    DEFAULT_TTL as WARMUP_DEFAULT_TTL,
};
