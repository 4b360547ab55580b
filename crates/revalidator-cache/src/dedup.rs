//! Collapsing of concurrent identical calls.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;

use crate::error::{CacheContents, CacheError};
use crate::utils::defer::defer;

type Producer<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, CacheContents<T>> + Send + Sync>;
type KeyFn<A> = Arc<dyn Fn(&A) -> CacheContents<String> + Send + Sync>;
type SharedComputation<T> = Shared<BoxFuture<'static, CacheContents<T>>>;

/// Deduplicates concurrent calls to an async producer.
///
/// Calls are identified by a string key derived from their arguments. While a call for a key is
/// outstanding, further calls with the same key do not invoke the producer again, but wait for
/// the outstanding call and observe the same result, be it success or failure.
///
/// This does not memoize anything: as soon as a call settles it is forgotten, and the next call
/// for the same key invokes the producer again. Keeping results around is the job of the
/// [`ResultCache`](crate::ResultCache).
///
/// Producers are spawned onto the tokio runtime and run to completion even when all of their
/// callers went away.
pub struct CallDeduplicator<A, T> {
    name: &'static str,
    producer: Producer<A, T>,
    key_of: KeyFn<A>,
    /// Calls that are currently running, by key.
    pending: Arc<Mutex<HashMap<String, SharedComputation<T>>>>,
}

impl<A, T> fmt::Debug for CallDeduplicator<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .pending
            .try_lock()
            .map(|p| p.len())
            .unwrap_or_default();
        f.debug_struct("CallDeduplicator")
            .field("name", &self.name)
            .field("pending calls", &pending)
            .finish()
    }
}

impl<A, T> Clone for CallDeduplicator<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            producer: Arc::clone(&self.producer),
            key_of: Arc::clone(&self.key_of),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<A, T> CallDeduplicator<A, T>
where
    A: Serialize + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wraps `producer`, keying calls by the JSON serialization of their arguments.
    ///
    /// Arguments that serialize identically are treated as the same call, regardless of whether
    /// they are the same instance.
    pub fn new<F, Fut>(name: &'static str, producer: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        Self::with_fallible_key(name, producer, |args: &A| {
            Ok(serde_json::to_string(args)?)
        })
    }
}

impl<A, T> CallDeduplicator<A, T>
where
    A: 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wraps `producer`, keying calls by `key_of`.
    ///
    /// `key_of` must return equal keys exactly for those arguments that should share a call.
    pub fn with_key<F, Fut, K>(name: &'static str, producer: F, key_of: K) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self::with_fallible_key(name, producer, move |args: &A| Ok(key_of(args)))
    }

    fn with_fallible_key<F, Fut, K>(name: &'static str, producer: F, key_of: K) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
        K: Fn(&A) -> CacheContents<String> + Send + Sync + 'static,
    {
        Self {
            name,
            producer: Arc::new(move |args| producer(args).boxed()),
            key_of: Arc::new(key_of),
            pending: Default::default(),
        }
    }

    /// Calls the producer with `args`, or joins an outstanding call with the same key.
    ///
    /// # Errors
    ///
    /// Returns the error of the producer call this caller observed. A producer that panics
    /// results in [`CacheError::InternalError`] for all of its callers.
    pub async fn call(&self, args: A) -> CacheContents<T> {
        let key = (self.key_of)(&args)?;
        metric!(counter("dedup.call") += 1, "name" => self.name);

        let computation = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get(&key) {
                Some(computation) => {
                    metric!(counter("dedup.joined") += 1, "name" => self.name);
                    tracing::trace!("Joining outstanding {} call for {}", self.name, key);
                    computation.clone()
                }
                None => {
                    // Spawned while holding the lock, so the slot can not be released before
                    // it was even inserted.
                    let computation = self.spawn_computation(key.clone(), args);
                    pending.insert(key, computation.clone());
                    computation
                }
            }
        };

        computation.await
    }

    /// Spawns the producer call for `args`.
    ///
    /// The registry slot for `key` is released as soon as the producer settles, before any of
    /// the waiters observe the result.
    fn spawn_computation(&self, key: String, args: A) -> SharedComputation<T> {
        tracing::trace!("Spawning {} call for {}", self.name, key);

        let done_token = {
            let pending = Arc::clone(&self.pending);
            defer(move || {
                pending.lock().unwrap().remove(&key);
            })
        };

        let computation = (self.producer)(args);
        let handle = tokio::spawn(
            async move {
                let _done_token = done_token; // move into the future
                computation.await
            }
            .bind_hub(Hub::new_from_top(Hub::current())),
        );

        async move {
            handle
                .await
                .unwrap_or_else(|err| Err(CacheError::from_std_error(err)))
        }
        .boxed()
        .shared()
    }

    /// The number of calls currently in flight.
    #[cfg(test)]
    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
