//! Stale-while-revalidate caching of async computations.
//!
//! # Structure
//!
//! A [`ResultCache`] sits on top of a durable [`Store`](store::Store), and wraps async producers
//! into [`CachedFunction`]s. Every stored value carries the time it was stored at, and the
//! [`CachePolicy`] of the wrapped function decides what happens with it on access:
//!
//! - A **fresh** value is returned as is.
//! - A **stale** value is returned right away, and refreshed in the background. At most one
//!   refresh per key runs at any time, and the number of concurrent background refreshes is
//!   limited. Failed refreshes leave the stored value untouched.
//! - A missing or **expired** value is computed by invoking the producer. Concurrent callers
//!   share a single invocation.
//!
//! Failures of the store never reach callers: unreadable entries are treated as missing, and
//! failed writes are logged and otherwise ignored. Failures of the producer reach the callers
//! that waited on it, and are never stored.
//!
//! The coalescing of concurrent calls is available on its own as the [`CallDeduplicator`], which
//! does not keep any results around once a call settled.
//!
//! # Stores
//!
//! - [`MemoryStore`](store::MemoryStore) keeps entries in a map, mostly for tests.
//! - [`FilesystemStore`](store::FilesystemStore) keeps one JSON file per entry, under a path
//!   derived from the hash of the key. Writes are atomic.
//!
//! # Metrics
//!
//! Once [`metrics::configure_statsd`] was called, the cache reports accesses, hits by freshness,
//! misses, computations, refreshes and store errors, tagged with the name of the function.

#[macro_use]
pub mod metrics;

mod cache;
pub mod clock;
pub mod config;
mod dedup;
pub mod error;
pub mod features;
pub mod logging;
pub mod policy;
pub mod store;
mod utils;


pub use cache::{CachedFunction, ResultCache};
pub use clock::{Clock, SystemClock};
pub use config::{CacheConfig, StoreConfig};
pub use dedup::CallDeduplicator;
pub use error::{CacheContents, CacheError, StoreError};
pub use policy::{CachePolicy, Freshness, PolicyConfig};
