use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use revalidator_cache::CacheContents;
use revalidator_cache::features::GraphQlClient;
use serde_json::Value;

type Handler = Box<dyn Fn(&str) -> CacheContents<Value> + Send + Sync>;

/// A [`GraphQlClient`] answering queries with a fixed handler, recording every query it sees.
pub struct FakeClient {
    handler: Handler,
    delay: Duration,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl fmt::Debug for FakeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeClient")
            .field("calls", &self.calls())
            .finish()
    }
}

impl FakeClient {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> CacheContents<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Makes every query take `delay` before it is answered.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl GraphQlClient for FakeClient {
    async fn query(&self, query: &str) -> CacheContents<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_owned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(query)
    }
}

/// Gives background tasks a chance to finish.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
