//! Keyed in-process cache with reactive observation and lazy deduplicated
//! loading.
//!
//! This crate provides:
//! - a process-wide [`ValueStore`] of broadcast-with-replay slots,
//! - per-key [`EntryHandle`]s,
//! - deterministic key generation ([`KeyGenerator`]),
//! - the [`LazyValue`] load/deduplication engine,
//! - a memoizing [`LazyValueFactory`] with per-loader [`CacheHolder`]s.
//!
//! Values live only for the lifetime of the store; there is no persistence,
//! no eviction, and no cross-process sharing.

pub mod factory;
pub mod handle;
pub mod keys;
pub mod lazy;
pub mod store;

mod registry;
mod slot;
mod streams;

pub use factory::{CacheHolder, HolderOptions, LazyValueFactory};
pub use handle::EntryHandle;
pub use keys::KeyGenerator;
pub use lazy::{LazyValue, Loader};
pub use store::ValueStore;

pub use recache_core::{Error, Result, Value};
