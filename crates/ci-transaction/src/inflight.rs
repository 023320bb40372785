//! Per-device inflight limiting with a FIFO waiter queue. Several real
//! devices drop or corrupt chunks when too many large PE transactions are
//! in flight concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use ci_codec::Muid;
use tokio::sync::oneshot;

pub const DEFAULT_MAX_INFLIGHT_PER_DEVICE: usize = 2;

#[derive(Default)]
struct Slot {
    count: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

pub struct InflightLimiter {
    cap: usize,
    slots: Mutex<HashMap<Muid, Slot>>,
}

impl InflightLimiter {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(InflightLimiter {
            cap: cap.max(1),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Admit a caller for `device`, parking it behind any already-inflight
    /// transactions for that device beyond the cap. Returns a guard that
    /// releases the slot (and wakes the next FIFO waiter) on drop.
    pub async fn acquire(self: &Arc<Self>, device: Muid) -> InflightPermit {
        let rx = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry(device).or_default();
            if slot.count < self.cap {
                slot.count += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                slot.waiters.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        InflightPermit {
            limiter: self.clone(),
            device,
        }
    }

    fn release(&self, device: Muid) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(&device) {
            if let Some(tx) = slot.waiters.pop_front() {
                let _ = tx.send(());
            } else {
                slot.count = slot.count.saturating_sub(1);
            }
        }
    }

    pub fn inflight_count(&self, device: Muid) -> usize {
        self.slots.lock().unwrap().get(&device).map_or(0, |s| s.count)
    }
}

/// Holds one inflight slot for a device; releasing it (by drop) admits the
/// oldest parked waiter, if any.
pub struct InflightPermit {
    limiter: Arc<InflightLimiter>,
    device: Muid,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.limiter.release(self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_immediately_while_under_cap() {
        let limiter = InflightLimiter::new(2);
        let device = Muid::from_raw(1);
        let _a = limiter.acquire(device).await;
        let _b = limiter.acquire(device).await;
        assert_eq!(limiter.inflight_count(device), 2);
    }

    #[tokio::test]
    async fn third_caller_parks_until_a_slot_is_released() {
        let limiter = InflightLimiter::new(1);
        let device = Muid::from_raw(1);
        let first = limiter.acquire(device).await;

        let limiter2 = limiter.clone();
        let handle = tokio::spawn(async move {
            let _second = limiter2.acquire(device).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn releasing_with_no_waiters_decrements_count() {
        let limiter = InflightLimiter::new(2);
        let device = Muid::from_raw(1);
        let permit = limiter.acquire(device).await;
        assert_eq!(limiter.inflight_count(device), 1);
        drop(permit);
        assert_eq!(limiter.inflight_count(device), 0);
    }
}
