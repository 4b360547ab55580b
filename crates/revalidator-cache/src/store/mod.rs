//! Durable key-value stores backing a [`ResultCache`](crate::ResultCache).
//!
//! The cache owns the read-modify-write protocol against a store, but not the medium itself.
//! A store may be shared by multiple caches and processes. No cross-process locking is done,
//! concurrent writers to the same key race and the last write wins.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

mod fs;
mod memory;

pub use fs::FilesystemStore;
pub use memory::MemoryStore;

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// The cached value, opaque to the cache.
    pub value: serde_json::Value,
    /// When the value was computed.
    pub stored_at: DateTime<Utc>,
}

/// A durable key-value store.
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    /// Returns the entry stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Stores `entry` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError>;

    /// Removes the entry stored under `key`.
    ///
    /// Removing a key that does not exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists all keys currently in the store.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}
