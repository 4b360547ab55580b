use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// How a [`CachedFunction`](crate::CachedFunction) caches its results.
///
/// `max_age` and `stale_while_revalidate` are independent durations:
///
/// ```text
/// stored_at         stored_at + max_age         + stale_while_revalidate
///     |------ fresh ------|---------- stale ----------|------ expired ------>
/// ```
#[derive(Clone)]
pub struct CachePolicy {
    /// Duration after which a cached value is stale.
    pub max_age: Duration,
    /// Additional duration during which a stale value is still served while it is being
    /// refreshed in the background.
    pub stale_while_revalidate: Duration,
    /// Produces the store key for the current call.
    ///
    /// This is evaluated on every access, and may depend on ambient context.
    pub cache_key: Arc<dyn Fn() -> String + Send + Sync>,
}

impl CachePolicy {
    pub fn new<K>(max_age: Duration, stale_while_revalidate: Duration, cache_key: K) -> Self
    where
        K: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            max_age,
            stale_while_revalidate,
            cache_key: Arc::new(cache_key),
        }
    }

    /// Creates a policy using the durations of a [`PolicyConfig`].
    pub fn from_config<K>(config: &PolicyConfig, cache_key: K) -> Self
    where
        K: Fn() -> String + Send + Sync + 'static,
    {
        Self::new(config.max_age, config.stale_while_revalidate, cache_key)
    }

    /// Evaluates the cache key for the current call.
    pub fn cache_key(&self) -> String {
        (self.cache_key)()
    }

    /// Classifies an entry stored at `stored_at` as seen at `now`.
    ///
    /// Entries from the future (clock skew between writers) count as just stored.
    pub fn freshness(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        let age = now
            .signed_duration_since(stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if age < self.max_age {
            Freshness::Fresh
        } else if age < self.max_age.saturating_add(self.stale_while_revalidate) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("max_age", &self.max_age)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .finish_non_exhaustive()
    }
}

/// The durations of a [`CachePolicy`], as they appear in configuration files.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Duration after which a cached value is stale.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Additional duration during which a stale value is served.
    #[serde(with = "humantime_serde", default)]
    pub stale_while_revalidate: Duration,
}

/// The state of a cache entry relative to its [`CachePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served without recomputation.
    Fresh,
    /// Served immediately, while a refresh runs in the background.
    Stale,
    /// Must be recomputed before it can be served.
    Expired,
}

impl AsRef<str> for Freshness {
    fn as_ref(&self) -> &str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn policy() -> CachePolicy {
        CachePolicy::new(Duration::from_secs(30), Duration::from_secs(120), || {
            "key".into()
        })
    }

    #[test]
    fn test_freshness_boundaries() {
        let policy = policy();
        let stored_at = Utc::now();
        let at = |secs| stored_at + TimeDelta::seconds(secs);

        assert_eq!(policy.freshness(stored_at, at(0)), Freshness::Fresh);
        assert_eq!(policy.freshness(stored_at, at(29)), Freshness::Fresh);
        assert_eq!(policy.freshness(stored_at, at(30)), Freshness::Stale);
        assert_eq!(policy.freshness(stored_at, at(149)), Freshness::Stale);
        assert_eq!(policy.freshness(stored_at, at(150)), Freshness::Expired);
        assert_eq!(policy.freshness(stored_at, at(10_000)), Freshness::Expired);
    }

    #[test]
    fn test_freshness_clock_skew() {
        let policy = policy();
        let stored_at = Utc::now();
        let now = stored_at - TimeDelta::seconds(60);

        assert_eq!(policy.freshness(stored_at, now), Freshness::Fresh);
    }

    #[test]
    fn test_no_stale_window() {
        let policy = CachePolicy::new(Duration::from_secs(10), Duration::ZERO, || "k".into());
        let stored_at = Utc::now();

        assert_eq!(
            policy.freshness(stored_at, stored_at + TimeDelta::seconds(10)),
            Freshness::Expired
        );
    }

    #[test]
    fn test_unbounded_durations() {
        let policy = CachePolicy::new(Duration::MAX, Duration::MAX, || "k".into());
        let stored_at = Utc::now();

        assert_eq!(
            policy.freshness(stored_at, stored_at + TimeDelta::days(365 * 100)),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_cache_key_reevaluated() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let policy = {
            let calls = Arc::clone(&calls);
            CachePolicy::new(Duration::ZERO, Duration::ZERO, move || {
                format!("key:{}", calls.fetch_add(1, Ordering::SeqCst))
            })
        };

        assert_eq!(policy.cache_key(), "key:0");
        assert_eq!(policy.cache_key(), "key:1");
    }
}
