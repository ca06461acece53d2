//! Memoizing factory for lazy values.
//!
//! The factory groups all entries of one loader under a [`CacheHolder`]
//! keyed by the loader's key prefix, and each holder memoizes one
//! [`LazyValue`] per serialized argument tuple. Holders and entries are
//! created once and reused for the lifetime of the factory; clearing resets
//! the underlying slots without discarding the objects.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use futures::StreamExt;
//! # use recache_cache::{LazyValueFactory, Result, ValueStore};
//! # async fn example() -> Result<()> {
//! let factory = LazyValueFactory::new(Arc::new(ValueStore::new()));
//! let users = factory.holder("User", |id: &u64| {
//!     let id = *id;
//!     futures::stream::once(async move { Ok(format!("user-{id}")) }).boxed()
//! })?;
//!
//! let user = users.entry(7)?;
//! let name = user.get().await?;
//! # let _ = name;
//! # Ok(())
//! # }
//! ```

use crate::handle::EntryHandle;
use crate::keys::KeyGenerator;
use crate::lazy::{LazyValue, Loader};
use crate::registry;
use crate::store::ValueStore;
use dashmap::DashMap;
use futures::stream::BoxStream;
use recache_core::{Error, Result, Value};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// Per-entry configuration for a holder's entries.
#[derive(Debug, Clone, Default)]
pub struct HolderOptions {
    /// Overrides the generated key prefix.
    pub custom_key: Option<String>,
    /// Excludes the holder's entries from a global store clear.
    pub keep_always: bool,
}

/// Factory for caches of a specific loader.
///
/// Holders are memoized per key prefix: repeated calls with the same result
/// tag (or custom key) return the same holder, and through it the same lazy
/// values, rather than creating redundant loaders.
pub struct LazyValueFactory {
    store: Arc<ValueStore>,
    holders: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl LazyValueFactory {
    #[must_use]
    pub fn new(store: Arc<ValueStore>) -> Self {
        Self {
            store,
            holders: DashMap::new(),
        }
    }

    /// The store this factory publishes into.
    #[must_use]
    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    /// Get or create the holder for `result_tag` with default options.
    pub fn holder<T, A>(
        &self,
        result_tag: &str,
        loader: impl Fn(&A) -> BoxStream<'static, Result<T>> + Send + Sync + 'static,
    ) -> Result<Arc<CacheHolder<T, A>>>
    where
        T: Value + PartialEq,
        A: Serialize + Clone + Send + Sync + 'static,
    {
        self.holder_with(result_tag, HolderOptions::default(), loader)
    }

    /// Get or create the holder for `result_tag` / `options.custom_key`.
    ///
    /// The first call for a prefix installs the holder (and its loader);
    /// later calls return the installed holder and ignore their `loader`
    /// argument. A prefix first registered under different `(T, A)` types is
    /// reported as a type mismatch.
    pub fn holder_with<T, A>(
        &self,
        result_tag: &str,
        options: HolderOptions,
        loader: impl Fn(&A) -> BoxStream<'static, Result<T>> + Send + Sync + 'static,
    ) -> Result<Arc<CacheHolder<T, A>>>
    where
        T: Value + PartialEq,
        A: Serialize + Clone + Send + Sync + 'static,
    {
        let keygen = KeyGenerator::new(result_tag, options.custom_key);
        let prefix = keygen.prefix().to_string();
        let erased = registry::get_or_init(&self.holders, &prefix, || {
            debug!(prefix = %prefix, "installing cache holder");
            Arc::new(CacheHolder::new(
                Arc::clone(&self.store),
                keygen,
                options.keep_always,
                Arc::new(loader) as Loader<T, A>,
            )) as Arc<dyn Any + Send + Sync>
        });
        erased.downcast::<CacheHolder<T, A>>().map_err(|_| {
            Error::type_mismatch(prefix, std::any::type_name::<CacheHolder<T, A>>())
        })
    }
}

/// All cached argument variants of one loader.
pub struct CacheHolder<T, A> {
    store: Arc<ValueStore>,
    keygen: KeyGenerator,
    keep_always: bool,
    loader: Loader<T, A>,
    entries: DashMap<String, Arc<LazyValue<T, A>>>,
}

impl<T, A> CacheHolder<T, A>
where
    T: Value + PartialEq,
    A: Serialize + Clone + Send + Sync + 'static,
{
    fn new(
        store: Arc<ValueStore>,
        keygen: KeyGenerator,
        keep_always: bool,
        loader: Loader<T, A>,
    ) -> Self {
        Self {
            store,
            keygen,
            keep_always,
            loader,
            entries: DashMap::new(),
        }
    }

    /// Get or create the lazy value for one argument tuple. Repeated calls
    /// with equal arguments return the same instance.
    pub fn entry(&self, args: A) -> Result<Arc<LazyValue<T, A>>> {
        let key = self.keygen.generate(&args)?;
        Ok(registry::get_or_init(&self.entries, &key, || {
            let handle: EntryHandle<T> = self.store.register_handle(key.clone(), self.keep_always);
            Arc::new(LazyValue::new(handle, args.clone(), Arc::clone(&self.loader)))
        }))
    }

    /// Reset every entry this holder has produced to absent. The memoized
    /// [`LazyValue`] objects themselves are kept.
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.value().clear();
        }
    }

    /// Apply `f` to every entry this holder currently knows about.
    pub fn map_all_cached<R>(&self, mut f: impl FnMut(&LazyValue<T, A>) -> R) -> Vec<R> {
        self.entries.iter().map(|entry| f(entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    fn factory() -> LazyValueFactory {
        LazyValueFactory::new(Arc::new(ValueStore::new()))
    }

    fn echo_loader(id: &u64) -> BoxStream<'static, Result<u64>> {
        let id = *id;
        stream::once(async move { Ok(id * 10) }).boxed()
    }

    #[tokio::test]
    async fn entries_are_memoized_per_arguments() {
        let factory = factory();
        let holder = factory.holder("Echo", echo_loader).unwrap();

        let first = holder.entry(1).unwrap();
        let again = holder.entry(1).unwrap();
        let other = holder.entry(2).unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn holders_are_memoized_per_prefix() {
        let factory = factory();
        let first = factory.holder("Echo", echo_loader).unwrap();
        let again = factory.holder("Echo", echo_loader).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let custom = factory
            .holder_with(
                "Echo",
                HolderOptions {
                    custom_key: Some("echo-v2".to_string()),
                    keep_always: false,
                },
                echo_loader,
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &custom));
    }

    #[tokio::test]
    async fn mismatched_holder_types_are_reported() {
        let factory = factory();
        let _typed = factory.holder("Echo", echo_loader).unwrap();
        let result = factory.holder("Echo", |flag: &bool| {
            let flag = *flag;
            stream::once(async move { Ok(flag) }).boxed()
        });
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn clear_resets_every_entry() {
        let factory = factory();
        let holder = factory.holder("Echo", echo_loader).unwrap();

        assert_eq!(holder.entry(1).unwrap().get().await.unwrap(), 10);
        assert_eq!(holder.entry(2).unwrap().get().await.unwrap(), 20);

        holder.clear();

        assert_eq!(holder.entry(1).unwrap().peek().unwrap(), None);
        assert_eq!(holder.entry(2).unwrap().peek().unwrap(), None);
    }

    #[tokio::test]
    async fn map_all_cached_visits_every_entry() {
        let factory = factory();
        let holder = factory.holder("Echo", echo_loader).unwrap();
        holder.entry(1).unwrap().set(1).unwrap();
        holder.entry(2).unwrap().set(2).unwrap();

        let mut values: Vec<_> = holder
            .map_all_cached(|entry| entry.peek().unwrap().unwrap())
            .into_iter()
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }
}
