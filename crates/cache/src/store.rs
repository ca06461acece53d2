//! Process-wide registry of keyed cache slots.
//!
//! The store maps string keys to broadcast-with-replay slots of an optional
//! value. Slots are created on first access and live for the lifetime of the
//! store; `clear` resets values, it never removes slots. Keys registered
//! through a handle without the keep-always flag are reset by a global
//! `clear`.

use crate::handle::EntryHandle;
use crate::keys::KeyGenerator;
use crate::registry;
use crate::slot::{ErasedSlot, Slot};
use dashmap::{DashMap, DashSet};
use futures::stream::{self, Stream, StreamExt};
use recache_core::{Error, Result, Value};
use serde::Serialize;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace, warn};

/// Marker serialized into keys for handles registered directly on the store,
/// so a direct handle and a factory-produced entry with the same prefix
/// never collide.
#[derive(Serialize)]
struct StoreEntryMarker;

/// Keyed in-process value store with broadcast observation.
#[derive(Default)]
pub struct ValueStore {
    slots: DashMap<String, Arc<dyn ErasedSlot>>,
    clearable: DashSet<String>,
}

impl ValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `key`, creating the slot if needed.
    pub fn set<T: Value>(&self, key: &str, value: T) -> Result<()> {
        trace!(key, "cache set");
        self.slot::<T>(key)?.publish(Some(value));
        Ok(())
    }

    /// Atomic read-modify-write on one slot. `f` receives the current
    /// optional value; a `Some` return is published as present, a `None`
    /// return publishes nothing.
    ///
    /// Updates on one key are mutually exclusive; different keys do not
    /// contend. `f` may run while other callers wait, so keep it cheap and
    /// side-effect free.
    pub fn update<T: Value>(&self, key: &str, f: impl FnOnce(Option<T>) -> Option<T>) -> Result<()> {
        self.slot::<T>(key)?.update_with(f);
        Ok(())
    }

    /// Run `f` only when a value is currently present; otherwise a no-op.
    pub fn update_if_present<T: Value>(&self, key: &str, f: impl FnOnce(T) -> T) -> Result<()> {
        self.update(key, |current: Option<T>| current.map(f))
    }

    /// Publish an absence under `key`. Existing observers keep their
    /// subscriptions; they simply see no value until the next `set`.
    pub fn remove(&self, key: &str) {
        if let Some(slot) = self.slots.get(key) {
            trace!(key, "cache remove");
            slot.clear();
        }
    }

    /// Last published value without subscribing.
    pub fn peek<T: Value>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.slot::<T>(key)?.last())
    }

    /// Resolve immediately to the current value, or to `None` when absent.
    /// Never waits for future publications.
    pub async fn get<T: Value>(&self, key: &str) -> Result<Option<T>> {
        self.peek(key)
    }

    /// Observe present values under `key`: the current value (if any) is
    /// replayed first, then every subsequent present publication follows in
    /// publication order. Absences are filtered out, not delivered.
    ///
    /// The stream is infinite; every call produces an independent
    /// subscription.
    pub fn observe<T: Value>(&self, key: &str) -> Result<impl Stream<Item = T> + Send + 'static> {
        let slot = self.slot::<T>(key)?;
        let (replay, rx) = slot.subscribe();
        let key = key.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |item| {
            futures::future::ready(match item {
                Ok(value) => value,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(key = %key, skipped, "cache observer lagged; skipping missed publications");
                    None
                }
            })
        });
        Ok(stream::iter(replay).chain(live))
    }

    /// Whether the slot currently holds a present value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.is_present())
            .unwrap_or(false)
    }

    /// Reset every clearable key to absent. Keys registered with
    /// `keep_always = true` are untouched, as are in-flight loads: a load
    /// finishing after the clear re-publishes its value.
    pub fn clear(&self) {
        debug!(keys = self.clearable.len(), "clearing cache store");
        for key in self.clearable.iter() {
            if let Some(slot) = self.slots.get(key.as_str()) {
                slot.clear();
            }
        }
    }

    /// Register a handle for `key`. Unless `keep_always` is set, the key
    /// becomes subject to [`ValueStore::clear`].
    pub fn register_handle<T: Value>(
        self: &Arc<Self>,
        key: impl Into<String>,
        keep_always: bool,
    ) -> EntryHandle<T> {
        let key = key.into();
        if !keep_always {
            self.clearable.insert(key.clone());
        }
        EntryHandle::new(key, Arc::clone(self))
    }

    /// Register a handle under a generated key for `result_tag` /
    /// `custom_key`, the way the lazy-value factory generates its keys.
    pub fn handle<T: Value>(
        self: &Arc<Self>,
        result_tag: &str,
        custom_key: Option<String>,
        keep_always: bool,
    ) -> Result<EntryHandle<T>> {
        let key = KeyGenerator::new(result_tag, custom_key).generate(&StoreEntryMarker)?;
        Ok(self.register_handle(key, keep_always))
    }

    fn slot<T: Value>(&self, key: &str) -> Result<Arc<Slot<T>>> {
        let erased = registry::get_or_init(&self.slots, key, || {
            Arc::new(Slot::<T>::new()) as Arc<dyn ErasedSlot>
        });
        erased
            .into_any()
            .downcast::<Slot<T>>()
            .map_err(|_| Error::type_mismatch(key, std::any::type_name::<T>()))
    }
}
