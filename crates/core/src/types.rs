//! Shared type bounds for cache values.

/// Bound alias for anything storable in a cache slot.
///
/// Values are cloned on every publication and replay, and cross task
/// boundaries inside the load engine, hence the `Clone + Send + Sync`
/// requirements. Prefer cheap-to-clone types (or wrap large payloads in
/// `Arc`).
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}
