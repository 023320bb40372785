//! A small multicast event hub used for discovery lifecycle events and PE
//! subscription notifications.
//!
//! Each subscriber gets its own bounded buffer; a slow subscriber drops its
//! oldest unread events rather than applying backpressure to the publisher.
//! A subscriber only ever observes events published after it subscribed —
//! the receiving end is created synchronously inside `subscribe`, never
//! deferred to a later poll, so nothing produced between subscription and
//! first `recv` is lost.

use tokio::sync::broadcast;

/// Default per-subscriber buffer capacity (events, not bytes).
pub const DEFAULT_CAPACITY: usize = 100;

/// A multicast publisher. Cloning a `Hub` shares the same underlying
/// channel; all clones publish to the same set of subscribers.
#[derive(Clone)]
pub struct Hub<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Hub<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Hub { sender }
    }

    /// Create a new subscription. Synchronous by construction: the returned
    /// `Subscription` is already registered with the channel before this
    /// call returns, so no event published after this point can be missed.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event to every current subscriber. Returns the number of
    /// subscribers the event was delivered to (a value of 0 is not an
    /// error — it just means nobody is listening right now).
    pub fn publish(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for Hub<T> {
    fn default() -> Self {
        Hub::new(DEFAULT_CAPACITY)
    }
}

/// One subscriber's view onto a `Hub`.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Await the next event. Transparently skips over a `Lagged`
    /// notification (the drop-oldest policy already discarded those
    /// events); returns `None` once the hub has been fully dropped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, dropping oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
