//! Subscription bookkeeping: which subscription IDs are currently active,
//! and the long-lived multicast stream notifications are routed through.

use std::collections::HashSet;
use std::sync::Mutex;

use ci_hub::{Hub, Subscription, DEFAULT_CAPACITY};

use crate::response::Notification;

pub struct SubscriptionRegistry {
    active: Mutex<HashSet<String>>,
    hub: Hub<Notification>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        SubscriptionRegistry {
            active: Mutex::new(HashSet::new()),
            hub: Hub::new(DEFAULT_CAPACITY),
        }
    }

    pub fn register(&self, subscribe_id: String) {
        self.active.lock().unwrap().insert(subscribe_id);
    }

    pub fn unregister(&self, subscribe_id: &str) -> bool {
        self.active.lock().unwrap().remove(subscribe_id)
    }

    pub fn is_active(&self, subscribe_id: &str) -> bool {
        self.active.lock().unwrap().contains(subscribe_id)
    }

    /// Subscribe to the raw multicast stream. Callers filter by
    /// `subscribe_id` themselves — a single hub carries every active
    /// subscription's notifications.
    pub fn subscribe_stream(&self) -> Subscription<Notification> {
        self.hub.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        self.hub.publish(notification);
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
