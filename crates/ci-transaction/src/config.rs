//! Configuration surface for the Transaction Engine.

use std::time::Duration;

use ci_route::{DestinationStrategy, SendStrategy, WarmUpPolicy};

use crate::inflight::DEFAULT_MAX_INFLIGHT_PER_DEVICE;

#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub pe_timeout: Duration,
    pub multi_chunk_timeout_multiplier: f64,
    pub max_inflight_per_device: usize,
    pub request_id_cooldown: Duration,
    pub chunk_assembly_timeout: Duration,
    pub max_body_size: usize,
    pub max_retries: u32,
    pub destination_strategy: DestinationStrategy,
    pub destination_cache_ttl: Duration,
    pub pe_send_strategy: SendStrategy,
    pub warm_up_strategy: WarmUpPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            pe_timeout: Duration::from_secs(5),
            multi_chunk_timeout_multiplier: 1.5,
            max_inflight_per_device: DEFAULT_MAX_INFLIGHT_PER_DEVICE,
            request_id_cooldown: Duration::from_secs(2),
            chunk_assembly_timeout: Duration::from_secs(3),
            max_body_size: 1024 * 1024,
            max_retries: 2,
            destination_strategy: DestinationStrategy::Automatic,
            destination_cache_ttl: Duration::from_secs(30 * 60),
            pe_send_strategy: SendStrategy::Fallback,
            warm_up_strategy: WarmUpPolicy::Adaptive,
        }
    }
}
