//! Publish/subscribe: synchronous fan-out of messages to subscribers.
//!
//! Every connector, peer session and server owns a `Publisher`. Business
//! logic and response correlators subscribe to it.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tether_core::Message;

/// Receives every message published by a [`Publisher`] it is subscribed to.
///
/// Delivery is synchronous: `on_message` runs on the publishing task, in
/// subscription order. A subscriber that blocks stalls every subscriber after
/// it and the receive loop that published. Correlators only enqueue; business
/// logic that does real work should hand it off to a channel or a spawned task.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, message: &Message);
}

impl<F> Subscriber for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// Ordered set of subscribers. Cheap to clone; clones share the set.
#[derive(Clone, Default)]
pub struct Publisher {
    subscribers: Arc<RwLock<Vec<Arc<dyn Subscriber>>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut subs = self.write();
        if subs.iter().any(|s| same(s, &subscriber)) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    /// Remove a subscriber. Removing one that is not present is a no-op.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        let mut subs = self.write();
        let before = subs.len();
        subs.retain(|s| !same(s, subscriber));
        subs.len() != before
    }

    /// Deliver to every current subscriber. Returns how many were invoked.
    ///
    /// The set is snapshotted first, so subscribers may (un)subscribe from
    /// inside `on_message` without deadlocking.
    pub fn publish(&self, message: &Message) -> usize {
        let snapshot: Vec<Arc<dyn Subscriber>> = self.read().clone();
        for subscriber in &snapshot {
            subscriber.on_message(message);
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Subscriber>>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Subscriber>>> {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn same(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
