//! # Persistence Module
//!
//! A small key-value abstraction used by the [`Aggregator`](crate::aggregator::Aggregator)
//! and each [`RetryingSender`](crate::sender::RetryingSender) to survive restarts.
//!
//! The store is assumed single-writer per key; callers serialize their own
//! writes (the aggregator and each sender already hold a mutex around their
//! state while persisting).

use async_trait::async_trait;

mod disk;
mod memory;

pub use disk::DiskPersistence;
pub use memory::MemoryPersistence;

/// Durable key-value store with atomic replacement semantics.
///
/// After a successful `store(key, blob)` returns, a subsequent `load(key)`
/// on a fresh process must observe `blob` — this is what lets the
/// aggregator and senders rehydrate their state after a crash.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Load the blob stored under `key`, or `None` if absent.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Atomically replace the blob stored under `key`.
    async fn store(&self, key: &str, blob: Vec<u8>) -> Result<(), PersistenceError>;

    /// Remove the blob stored under `key`, if any.
    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    /// List all keys currently present.
    ///
    /// Used at startup to discover orphaned sender queues whose endpoint
    /// no longer appears in configuration.
    async fn keys(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Errors surfaced by a [`Persistence`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("invalid persistence key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error persisting key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Validate that `key` is safe to use as a filesystem path.
///
/// Keys may use `/` as a single level of namespacing (e.g. `sender/foo`)
/// but may not traverse (`..`), escape with an absolute path, or contain
/// empty segments.
pub(crate) fn validate_key(key: &str) -> Result<(), PersistenceError> {
    if key.is_empty() {
        return Err(PersistenceError::InvalidKey {
            key: key.to_string(),
            reason: "key must not be empty".to_string(),
        });
    }
    if key.starts_with('/') || key.ends_with('/') || key.contains("//") {
        return Err(PersistenceError::InvalidKey {
            key: key.to_string(),
            reason: "key must not have leading/trailing/consecutive slashes".to_string(),
        });
    }
    if key.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(PersistenceError::InvalidKey {
            key: key.to_string(),
            reason: "key segments must not be empty or '..'".to_string(),
        });
    }
    if key.contains('\\') {
        return Err(PersistenceError::InvalidKey {
            key: key.to_string(),
            reason: "key must not contain backslashes".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
