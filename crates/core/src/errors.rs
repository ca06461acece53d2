//! Error types for cache operations.

use std::sync::Arc;

/// Result type alias for recache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for recache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A loader produced an error while feeding a cache entry
    #[error("loader error: {message}")]
    Loader {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A shared load attempt failed; every caller joined to that attempt
    /// receives the same underlying error
    #[error("load for cache entry '{key}' failed: {source}")]
    LoadFailed {
        key: String,
        #[source]
        source: Arc<Error>,
    },

    /// A load stream completed without producing a value while a caller was
    /// waiting for its first value
    #[error("load for cache entry '{key}' completed without a value")]
    EmptyLoad { key: String },

    /// Argument serialization for key generation failed
    #[error("failed to {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A key was first registered under a different Rust type
    #[error("cache key '{key}' is already registered with a different type (expected {expected})")]
    TypeMismatch {
        key: String,
        expected: &'static str,
    },
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization {
            context: "serialize value".to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a loader error from a plain message
    #[must_use]
    pub fn loader(message: impl Into<String>) -> Self {
        Error::Loader {
            message: message.into(),
            source: None,
        }
    }

    /// Create a loader error wrapping an underlying error
    #[must_use]
    pub fn loader_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Loader {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a shared-load failure scoped to a cache key
    #[must_use]
    pub fn load_failed(key: impl Into<String>, source: Arc<Error>) -> Self {
        Error::LoadFailed {
            key: key.into(),
            source,
        }
    }

    /// Create an empty-load error for a cache key
    #[must_use]
    pub fn empty_load(key: impl Into<String>) -> Self {
        Error::EmptyLoad { key: key.into() }
    }

    /// Create a serialization error with context
    #[must_use]
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a type-mismatch error for a cache key
    #[must_use]
    pub fn type_mismatch(key: impl Into<String>, expected: &'static str) -> Self {
        Error::TypeMismatch {
            key: key.into(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_error_displays_message() {
        let error = Error::loader("backend unavailable");
        assert_eq!(error.to_string(), "loader error: backend unavailable");
    }

    #[test]
    fn load_failed_carries_shared_source() {
        let source = Arc::new(Error::loader("boom"));
        let error = Error::load_failed("users", Arc::clone(&source));
        assert!(error.to_string().contains("users"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn type_mismatch_names_expected_type() {
        let error = Error::type_mismatch("key", "alloc::string::String");
        assert!(error.to_string().contains("alloc::string::String"));
    }
}
