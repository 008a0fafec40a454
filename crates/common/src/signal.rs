//! Payload-free broadcast signal.
//!
//! A [`Broadcaster`] fans a "something changed" signal out to any number of
//! subscribers. Delivery is non-blocking and coalescing: every subscriber
//! sink is a single-slot channel, so a subscriber that is not currently
//! receiving keeps at most one pending signal and misses the rest.
//! Consumers always re-fetch the latest state after waking up, so a missed
//! intermediate signal never loses information.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Handle identifying a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Inner {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: u64) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }
}

/// Fan-out notifier with revocable subscriber handles.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register an externally created sink.
    ///
    /// The sink should be bounded with capacity 1 to get coalescing
    /// semantics; larger capacities queue up to that many signals.
    pub fn subscribe_sender(&self, sink: mpsc::Sender<()>) -> SubscriberId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(id, sink);
        trace!(subscriber = id, "Registered broadcast subscriber");
        SubscriberId(id)
    }

    /// Create a private single-slot sink and register it.
    ///
    /// The returned [`Subscription`] unregisters itself when dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let id = self.subscribe_sender(tx);
        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a sink. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id.0);
        if removed {
            trace!(subscriber = id.0, "Removed broadcast subscriber");
        }
        removed
    }

    /// Signal every subscriber without blocking.
    ///
    /// Full sinks already hold a pending signal and are skipped. Sinks whose
    /// receiver is gone are pruned.
    pub fn broadcast(&self) {
        let mut subscribers = self.inner.subscribers.lock();
        let mut closed = Vec::new();
        for (id, sink) in subscribers.iter() {
            match sink.try_send(()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(())) => {
                    trace!(subscriber = id, "Subscriber busy, signal coalesced");
                }
                Err(mpsc::error::TrySendError::Closed(())) => closed.push(*id),
            }
        }
        for id in closed {
            subscribers.remove(&id);
            trace!(subscriber = id, "Pruned closed broadcast subscriber");
        }
    }

    /// Number of registered sinks
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A registered private sink.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<()>,
    owner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next signal.
    ///
    /// Returns false once the broadcaster is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consume a pending signal, if any.
    pub fn try_changed(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.remove(self.id.0);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_broadcast_delivers_once() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();

        broadcaster.broadcast();

        assert!(sub.changed().await);
        assert!(!sub.try_changed());
    }

    #[test]
    fn test_undrained_signals_coalesce() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.subscribe();

        broadcaster.broadcast();
        broadcaster.broadcast();

        assert!(sub.try_changed());
        assert!(!sub.try_changed());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let broadcaster = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(1);
        let id = broadcaster.subscribe_sender(tx);

        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));

        broadcaster.broadcast();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_sinks_are_pruned() {
        let broadcaster = Broadcaster::new();
        let (tx, rx) = mpsc::channel(1);
        broadcaster.subscribe_sender(tx);
        drop(rx);

        broadcaster.broadcast();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.broadcast();

        assert!(a.try_changed());
        assert!(b.try_changed());
    }
}
