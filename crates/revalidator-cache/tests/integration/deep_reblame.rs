use std::time::Duration;

use revalidator_cache::CacheError;
use revalidator_cache::features::deep_reblame::{BlameResolver, reblame_url};
use revalidator_cache::features::{CurrentRepository, Repository};
use serde_json::{Value, json};
use url::Url;

use crate::{FakeClient, settle};

/// A response for merge commit `abc123` of PR #42, whose last commit is `def456`.
///
/// Only `src/lib.rs` exists at that commit.
fn blame_response(query: &str) -> Value {
    let file = query
        .contains(r#""abc123:src/lib.rs""#)
        .then(|| json!({"id": "blob"}));
    json!({
        "repository": {
            "file": file,
            "object": {
                "associatedPullRequests": {
                    "nodes": [{
                        "number": 42,
                        "mergeCommit": {"oid": "abc123"},
                        "commits": {"nodes": [{"commit": {"oid": "def456"}}]}
                    }]
                }
            }
        }
    })
}

fn current() -> CurrentRepository {
    CurrentRepository::new(Repository::new("getsentry", "symbolicator"))
}

#[tokio::test]
async fn test_resolve_blame_commit() {
    revalidator_test::setup();

    let client = FakeClient::new(|query| Ok(blame_response(query))).into_arc();
    let resolver = BlameResolver::new(client.clone(), current());

    let commit = resolver.resolve("abc123", 42, "src/lib.rs").await;
    assert_eq!(commit, Ok("def456".to_owned()));

    let queries = client.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].contains(r#"repository(owner: "getsentry", name: "symbolicator")"#));
}

#[tokio::test]
async fn test_concurrent_lookups_are_shared() {
    revalidator_test::setup();

    let client = FakeClient::new(|query| Ok(blame_response(query)))
        .with_delay(Duration::from_millis(20))
        .into_arc();
    let resolver = BlameResolver::new(client.clone(), current());

    let (a, b, c) = tokio::join!(
        resolver.resolve("abc123", 42, "src/lib.rs"),
        resolver.resolve("abc123", 42, "src/lib.rs"),
        resolver.resolve("abc123", 42, "src/lib.rs"),
    );
    assert_eq!(a, Ok("def456".to_owned()));
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(client.calls(), 1);

    // once settled, lookups are not remembered
    settle().await;
    resolver.resolve("abc123", 42, "src/lib.rs").await.unwrap();
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_distinct_lookups_are_not_shared() {
    revalidator_test::setup();

    let client = FakeClient::new(|query| Ok(blame_response(query)))
        .with_delay(Duration::from_millis(20))
        .into_arc();
    let resolver = BlameResolver::new(client.clone(), current());

    let (lib, main) = tokio::join!(
        resolver.resolve("abc123", 42, "src/lib.rs"),
        resolver.resolve("abc123", 42, "src/main.rs"),
    );
    assert_eq!(lib, Ok("def456".to_owned()));
    assert_eq!(
        main,
        Err(CacheError::Malformed(
            "the file was renamed and can't be found".into()
        ))
    );
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_commit_not_created_by_pr() {
    revalidator_test::setup();

    let client = FakeClient::new(|query| Ok(blame_response(query))).into_arc();
    let resolver = BlameResolver::new(client, current());

    let result = resolver.resolve("abc123", 7, "src/lib.rs").await;
    assert_eq!(
        result,
        Err(CacheError::Malformed(
            "the PR linked in the title didn't create this commit".into()
        ))
    );
}

#[tokio::test]
async fn test_failures_are_shared() {
    revalidator_test::setup();

    let client = FakeClient::new(|_| Err(CacheError::Timeout(Duration::from_secs(10))))
        .with_delay(Duration::from_millis(20))
        .into_arc();
    let resolver = BlameResolver::new(client.clone(), current());

    let (a, b) = tokio::join!(
        resolver.resolve("abc123", 42, "src/lib.rs"),
        resolver.resolve("abc123", 42, "src/lib.rs"),
    );
    assert_eq!(a, Err(CacheError::Timeout(Duration::from_secs(10))));
    assert_eq!(a, b);
    assert_eq!(client.calls(), 1);
}

#[test]
fn test_reblame_url() {
    let location = Url::parse(
        "https://github.com/getsentry/symbolicator/blame/1.2.0/crates/symbolicator/src/main.rs",
    )
    .unwrap();

    let url = reblame_url(&location, "1.2.0", "def456", 120).unwrap();
    assert_eq!(
        url.as_str(),
        "https://github.com/getsentry/symbolicator/blame/def456/crates/symbolicator/src/main.rs#L120"
    );
}
