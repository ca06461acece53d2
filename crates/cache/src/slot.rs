//! Broadcast-with-replay slot, the reactive primitive behind every cache key.
//!
//! A slot remembers the most recently published optional value and fans every
//! subsequent publication out to all live subscribers in publication order.
//! New subscribers receive the remembered value immediately.

use parking_lot::RwLock;
use recache_core::Value;
use std::any::Any;
use tokio::sync::broadcast;

/// Publications buffered per subscriber before a slow observer starts
/// skipping values.
pub(crate) const SLOT_CHANNEL_CAPACITY: usize = 1024;

/// A single cache slot: last published optional value plus a broadcast
/// channel of publications.
///
/// Publishers hold the write lock across {store, send}, so a subscriber that
/// takes the read lock, subscribes, and reads the replay value observes a
/// consistent cut: the replayed value plus every later publication, exactly
/// once, in order.
pub(crate) struct Slot<T> {
    last: RwLock<Option<T>>,
    tx: broadcast::Sender<Option<T>>,
}

impl<T: Value> Slot<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(SLOT_CHANNEL_CAPACITY);
        Self {
            last: RwLock::new(None),
            tx,
        }
    }

    /// Publish a value (`Some`) or an absence (`None`) to the slot.
    pub(crate) fn publish(&self, value: Option<T>) {
        let mut last = self.last.write();
        *last = value.clone();
        // Send failure only means there are no live subscribers; the replay
        // register still serves late ones.
        let _ = self.tx.send(value);
    }

    /// Last published value without subscribing.
    pub(crate) fn last(&self) -> Option<T> {
        self.last.read().clone()
    }

    pub(crate) fn has_value(&self) -> bool {
        self.last.read().is_some()
    }

    /// Atomically capture the replay value and a live subscription.
    pub(crate) fn subscribe(&self) -> (Option<T>, broadcast::Receiver<Option<T>>) {
        let last = self.last.read();
        let rx = self.tx.subscribe();
        (last.clone(), rx)
    }

    /// Serialized read-modify-write. The current value is handed to `f`;
    /// a `Some` return is published, a `None` return publishes nothing.
    pub(crate) fn update_with(&self, f: impl FnOnce(Option<T>) -> Option<T>) {
        let mut last = self.last.write();
        if let Some(next) = f(last.clone()) {
            *last = Some(next.clone());
            let _ = self.tx.send(Some(next));
        }
    }
}

/// Type-erased view of a slot, enough for untyped store operations
/// (`remove`, `contains`, `clear`).
pub(crate) trait ErasedSlot: Send + Sync + 'static {
    fn clear(&self);
    fn is_present(&self) -> bool;
    fn into_any(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn Any + Send + Sync>;
}

impl<T: Value> ErasedSlot for Slot<T> {
    fn clear(&self) {
        self.publish(None);
    }

    fn is_present(&self) -> bool {
        self.has_value()
    }

    fn into_any(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn Any + Send + Sync> {
        self
    }
}
