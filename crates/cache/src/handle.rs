//! Per-key view over the value store.

use crate::store::ValueStore;
use futures::stream::Stream;
use recache_core::{Result, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// A handle to a single cache entry, so callers don't repeat the key on
/// every operation. Cheap to clone; multiple handles for one key share the
/// same slot.
pub struct EntryHandle<T> {
    key: String,
    store: Arc<ValueStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EntryHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Value> EntryHandle<T> {
    pub(crate) fn new(key: String, store: Arc<ValueStore>) -> Self {
        Self {
            key,
            store,
            _marker: PhantomData,
        }
    }

    /// The key this handle is bound to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.store.set(&self.key, value)
    }

    /// Resolve immediately to the current value, or `None` when absent.
    pub async fn get(&self) -> Result<Option<T>> {
        self.store.get(&self.key).await
    }

    /// See [`ValueStore::observe`].
    pub fn observe(&self) -> Result<impl Stream<Item = T> + Send + 'static> {
        self.store.observe(&self.key)
    }

    /// See [`ValueStore::update`].
    pub fn update(&self, f: impl FnOnce(Option<T>) -> Option<T>) -> Result<()> {
        self.store.update(&self.key, f)
    }

    /// See [`ValueStore::update_if_present`].
    pub fn update_if_present(&self, f: impl FnOnce(T) -> T) -> Result<()> {
        self.store.update_if_present(&self.key, f)
    }

    /// Reset the entry to absent.
    pub fn clear(&self) {
        self.store.remove(&self.key);
    }

    pub fn peek(&self) -> Result<Option<T>> {
        self.store.peek(&self.key)
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.store.contains(&self.key)
    }
}
