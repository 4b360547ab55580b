use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use revalidator_cache::features::bugs_tab::{self, BugCounter};
use revalidator_cache::features::{CurrentRepository, Repository};
use revalidator_cache::store::{FilesystemStore, MemoryStore};
use revalidator_cache::{CacheError, PolicyConfig, ResultCache};
use serde_json::json;

use crate::{FakeClient, settle};

fn symbolicator() -> Repository {
    Repository::new("getsentry", "symbolicator")
}

fn relay() -> Repository {
    Repository::new("getsentry", "relay")
}

/// Answers with 5 bugs for symbolicator, and 12 for relay.
fn bug_client() -> Arc<FakeClient> {
    FakeClient::new(|query| {
        let count = if query.contains("repo:getsentry/symbolicator") {
            5
        } else if query.contains("repo:getsentry/relay") {
            12
        } else {
            return Err(CacheError::NotFound);
        };
        Ok(json!({"search": {"issueCount": count}}))
    })
    .into_arc()
}

#[tokio::test]
async fn test_fresh_count_is_cached() {
    revalidator_test::setup();

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    let client = bug_client();
    let counter = BugCounter::new(&cache, client.clone(), CurrentRepository::new(symbolicator()));

    assert_eq!(counter.count().await, Ok(5));
    assert_eq!(counter.count().await, Ok(5));
    assert_eq!(client.calls(), 1);

    let stored = cache
        .store()
        .get("cache:bugs-tab:getsentry/symbolicator")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, json!(5));
}

#[tokio::test]
async fn test_count_follows_current_repository() {
    revalidator_test::setup();

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    let client = bug_client();
    let current = CurrentRepository::new(symbolicator());
    let counter = BugCounter::new(&cache, client.clone(), current.clone());

    assert_eq!(counter.count().await, Ok(5));

    current.set(relay());
    assert_eq!(counter.count().await, Ok(12));
    assert_eq!(client.calls(), 2);

    // navigating back is served from the cache
    current.set(symbolicator());
    assert_eq!(counter.count().await, Ok(5));
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_stale_count_is_revalidated() {
    revalidator_test::setup();

    let bugs = Arc::new(AtomicU64::new(0));
    let client = {
        let bugs = bugs.clone();
        FakeClient::new(move |_| {
            let count = bugs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"search": {"issueCount": count}}))
        })
        .into_arc()
    };

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    // every entry is stale right away
    let policy = PolicyConfig {
        max_age: Duration::ZERO,
        stale_while_revalidate: Duration::from_secs(3600),
    };
    let counter = BugCounter::with_policy(
        &cache,
        client.clone(),
        CurrentRepository::new(symbolicator()),
        &policy,
    );

    assert_eq!(counter.count().await, Ok(1));

    // served stale, while being refreshed in the background
    assert_eq!(counter.count().await, Ok(1));
    settle().await;
    assert_eq!(client.calls(), 2);

    assert_eq!(counter.count().await, Ok(2));
}

#[tokio::test]
async fn test_pending_refresh_keeps_its_repository() {
    revalidator_test::setup();

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    let client = bug_client();
    let current = CurrentRepository::new(symbolicator());
    // every entry is stale right away
    let policy = PolicyConfig {
        max_age: Duration::ZERO,
        stale_while_revalidate: Duration::from_secs(3600),
    };
    let counter = BugCounter::with_policy(&cache, client.clone(), current.clone(), &policy);

    assert_eq!(counter.count().await, Ok(5));

    // the refresh is spawned, but only runs after navigating to another repository
    assert_eq!(counter.count().await, Ok(5));
    current.set(relay());
    settle().await;

    assert_eq!(client.calls(), 2);
    assert!(
        client
            .queries()
            .iter()
            .all(|query| query.contains("repo:getsentry/symbolicator"))
    );
    let stored = cache
        .store()
        .get("cache:bugs-tab:getsentry/symbolicator")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, json!(5));

    assert_eq!(counter.count().await, Ok(12));
    current.set(symbolicator());
    assert_eq!(counter.count().await, Ok(5));
}

#[tokio::test]
async fn test_query_failure_is_returned() {
    revalidator_test::setup();

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    let client = FakeClient::new(|_| Err(CacheError::RequestFailed("rate limited".into())));
    let counter = BugCounter::new(
        &cache,
        client.into_arc(),
        CurrentRepository::new(symbolicator()),
    );

    assert_eq!(
        counter.count().await,
        Err(CacheError::RequestFailed("rate limited".into()))
    );
    assert!(cache.store().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unexpected_response_is_malformed() {
    revalidator_test::setup();

    let cache = ResultCache::new(Arc::new(MemoryStore::new()));
    let client = FakeClient::new(|_| Ok(json!({"search": null})));
    let counter = BugCounter::new(
        &cache,
        client.into_arc(),
        CurrentRepository::new(symbolicator()),
    );

    assert!(matches!(
        counter.count().await,
        Err(CacheError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_count_survives_restarts() {
    revalidator_test::setup();
    let dir = revalidator_test::tempdir();

    let client = bug_client();
    let current = CurrentRepository::new(symbolicator());

    let store = Arc::new(FilesystemStore::new(dir.path()).unwrap());
    let cache = ResultCache::new(store);
    let counter = BugCounter::new(&cache, client.clone(), current.clone());
    assert_eq!(counter.count().await, Ok(5));

    let store = Arc::new(FilesystemStore::new(dir.path()).unwrap());
    let cache = ResultCache::new(store);
    let counter = BugCounter::new(&cache, client.clone(), current);
    assert_eq!(counter.count().await, Ok(5));
    assert_eq!(client.calls(), 1);

    assert_eq!(cache.clear().await.unwrap(), 1);
    assert_eq!(counter.count().await, Ok(5));
    assert_eq!(client.calls(), 2);
}

#[test]
fn test_default_policy() {
    assert_eq!(bugs_tab::DEFAULT_POLICY.max_age, Duration::from_secs(1800));
    assert_eq!(
        bugs_tab::DEFAULT_POLICY.stale_while_revalidate,
        Duration::from_secs(4 * 86400)
    );
}
