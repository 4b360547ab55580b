use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::store::{FilesystemStore, MemoryStore, Store};

/// The durable store backing a [`ResultCache`](crate::ResultCache).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Keep entries in memory. Nothing survives a restart.
    #[default]
    Memory,
    /// Keep entries as files in the given directory. Will be created if it does not exist.
    Filesystem { path: PathBuf },
}

impl StoreConfig {
    /// Creates the configured store.
    pub fn create(&self) -> io::Result<Arc<dyn Store>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::Filesystem { path } => Arc::new(FilesystemStore::new(path)?),
        })
    }
}

/// Configuration of a [`ResultCache`](crate::ResultCache).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of all the store keys owned by the cache.
    ///
    /// Clearing the cache removes exactly the keys with this prefix, so caches sharing a store
    /// should use distinct namespaces.
    pub namespace: String,

    /// Maximum number of concurrently running background refreshes.
    ///
    /// Stale entries are served without a refresh when the limit is reached. Values lower
    /// than `1` are treated as `1`.
    pub max_lazy_refreshes: isize,

    /// The store backend.
    pub store: StoreConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache:".into(),
            max_lazy_refreshes: 50,
            store: StoreConfig::default(),
        }
    }
}
