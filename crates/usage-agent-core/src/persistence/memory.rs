//! In-memory persistence, used when the operator opts out of durable state
//! with `--no-state`. Nothing survives a process restart.

use super::{validate_key, Persistence, PersistenceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory key-value store.
///
/// Satisfies the [`Persistence`] contract for the lifetime of one process;
/// intentionally does not persist anything to disk.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        validate_key(key)?;
        let entries = self.entries.lock().expect("persistence mutex poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn store(&self, key: &str, blob: Vec<u8>) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().expect("persistence mutex poisoned");
        entries.insert(key.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().expect("persistence mutex poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, PersistenceError> {
        let entries = self.entries.lock().expect("persistence mutex poisoned");
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
