//! Deterministic key generation for cache entries.
//!
//! A key is `prefix ++ serialized-args ++ args-type-name`. The prefix is the
//! caller-supplied custom key when present, otherwise the caller-supplied
//! result-type tag. Arguments are serialized with `serde_json`, which keeps
//! struct fields in declaration order; callers must use order-stable
//! argument types (structs, tuples, `BTreeMap` rather than `HashMap`) for
//! keys to be reproducible. The argument type name disambiguates tuples of
//! different types that happen to serialize identically.

use recache_core::{Error, Result};
use serde::Serialize;

/// Generates stable keys for the entries of one logical loader.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    result_tag: String,
    custom_key: Option<String>,
}

impl KeyGenerator {
    /// Create a generator for a result type tag and optional custom key.
    ///
    /// `result_tag` is an explicit textual descriptor of the result type;
    /// two loaders producing the same type must use distinct tags (or custom
    /// keys) or their entries will collide.
    #[must_use]
    pub fn new(result_tag: impl Into<String>, custom_key: Option<String>) -> Self {
        Self {
            result_tag: result_tag.into(),
            custom_key,
        }
    }

    /// The key prefix shared by all argument variants of one loader.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.custom_key.as_deref().unwrap_or(&self.result_tag)
    }

    /// Generate the full key for one argument tuple.
    pub fn generate<A: Serialize>(&self, args: &A) -> Result<String> {
        let serialized = serde_json::to_string(args)
            .map_err(|e| Error::serialization("serialize cache key arguments", e))?;
        Ok(format!(
            "{}{}{}",
            self.prefix(),
            serialized,
            std::any::type_name::<A>()
        ))
    }
}
