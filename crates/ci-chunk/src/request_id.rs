//! The 7-bit request-ID pool: allocation, release into cooldown, and
//! cooldown sweep.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Request IDs are 7-bit values, 0..=127.
pub const POOL_SIZE: u8 = 128;

/// Default cooldown a released ID spends unavailable before reuse.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("all 128 request IDs are in use or cooling down")]
    Exhausted,
}

/// Tracks in-use request IDs and the cooldown each released ID must clear
/// before it can be handed out again.
pub struct RequestIdPool {
    in_use: BTreeSet<u8>,
    cooldown: HashMap<u8, Instant>,
    cooldown_duration: Duration,
}

impl RequestIdPool {
    pub fn new(cooldown_duration: Duration) -> Self {
        RequestIdPool {
            in_use: BTreeSet::new(),
            cooldown: HashMap::new(),
            cooldown_duration,
        }
    }

    /// Evict cooldown entries whose expiry has passed as of `now`.
    fn sweep(&mut self, now: Instant) {
        self.cooldown.retain(|_, expiry| *expiry > now);
    }

    /// Return the lowest free ID, or `Exhausted` if all 128 are in use or
    /// cooling down.
    pub fn acquire(&mut self, now: Instant) -> Result<u8, PoolError> {
        self.sweep(now);
        for id in 0..POOL_SIZE {
            if !self.in_use.contains(&id) && !self.cooldown.contains_key(&id) {
                self.in_use.insert(id);
                return Ok(id);
            }
        }
        Err(PoolError::Exhausted)
    }

    /// Move `id` from in-use to cooldown, expiring at `now + cooldown_duration`.
    /// A no-op if `id` was not in use (release is idempotent, matching
    /// transaction cleanup that may run on more than one terminal path).
    pub fn release(&mut self, id: u8, now: Instant) {
        if self.in_use.remove(&id) {
            self.cooldown.insert(id, now + self.cooldown_duration);
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Count of IDs currently cooling down, as of the last `acquire` sweep.
    /// Callers wanting an up-to-date count should sweep first via `acquire`
    /// or `is_cooling_down`.
    pub fn cooldown_count(&self) -> usize {
        self.cooldown.len()
    }

    pub fn is_in_use(&self, id: u8) -> bool {
        self.in_use.contains(&id)
    }

    pub fn is_cooling_down(&self, id: u8, now: Instant) -> bool {
        match self.cooldown.get(&id) {
            Some(expiry) => *expiry > now,
            None => false,
        }
    }
}
