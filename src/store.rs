//! In-memory multi-valued store with thread-safe access
//!
//! Every key maps to an ordered, duplicate-free list of values. A single
//! mutex guards the whole map, so each operation is one atomic
//! read-then-write step.

use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Full contents of a store: key to ordered values
pub type Dictionary = HashMap<String, Vec<String>>;

/// Trait defining the interface for multi-valued storage operations
pub trait Store: Send + Sync {
    /// Get all values stored under a key (empty if absent)
    async fn get(&self, key: &str) -> Result<Vec<String>>;

    /// Append a value to a key unless it is already present
    async fn put(&self, key: String, value: String) -> Result<Vec<String>>;

    /// Remove a value from a key, dropping the key once it has no values
    async fn delete(&self, key: &str, value: &str) -> Result<Vec<String>>;

    /// Point-in-time copy of every entry (for snapshots)
    async fn snapshot(&self) -> Result<Dictionary>;

    /// Get the number of stored keys
    async fn len(&self) -> Result<usize>;
}

/// Thread-safe in-memory multi-valued store
pub struct MemoryStore {
    data: Arc<Mutex<Dictionary>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_dictionary(Dictionary::new())
    }

    /// Create a store pre-populated with loaded contents
    pub fn from_dictionary(data: Dictionary) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn put(&self, key: String, value: String) -> Result<Vec<String>> {
        let mut data = self.data.lock().await;
        let values = data.entry(key).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
        Ok(values.clone())
    }

    async fn delete(&self, key: &str, value: &str) -> Result<Vec<String>> {
        let mut data = self.data.lock().await;
        let Some(values) = data.get_mut(key) else {
            return Ok(Vec::new());
        };

        values.retain(|v| v != value);
        if values.is_empty() {
            data.remove(key);
            return Ok(Vec::new());
        }
        Ok(values.clone())
    }

    async fn snapshot(&self) -> Result<Dictionary> {
        let data = self.data.lock().await;
        Ok(data.clone())
    }

    async fn len(&self) -> Result<usize> {
        let data = self.data.lock().await;
        Ok(data.len())
    }
}
