//! Core types and errors for the `recache` workspace.
//!
//! This crate establishes the foundational building blocks used by the cache
//! crates: the primary `Error` enum, the `Result` type alias, and the `Value`
//! bound alias describing what can be stored in a cache slot.

pub mod errors;
pub mod types;

pub use self::{
    errors::{Error, Result},
    types::Value,
};
