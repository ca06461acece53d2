//! Atomic lazy-init registry.
//!
//! The same get-or-create race shows up three times in this crate: slot
//! creation in the store, holder memoization in the factory, and entry
//! memoization inside a holder. This helper resolves all of them the same
//! way: exactly one writer installs the new resource, every racing reader
//! reuses the installed instance.

use dashmap::DashMap;
use std::sync::Arc;

/// Get the value registered under `key`, or install the one produced by
/// `init`. First writer wins; `init` runs at most once per installation.
pub(crate) fn get_or_init<V, F>(map: &DashMap<String, Arc<V>>, key: &str, init: F) -> Arc<V>
where
    V: ?Sized,
    F: FnOnce() -> Arc<V>,
{
    // Fast path avoids taking the entry write lock for existing keys.
    if let Some(existing) = map.get(key) {
        return Arc::clone(existing.value());
    }
    let entry = map.entry(key.to_string()).or_insert_with(init);
    Arc::clone(entry.value())
}
