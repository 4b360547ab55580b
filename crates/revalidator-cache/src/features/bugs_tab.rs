//! Counts the open issues labeled `bug` of the current repository.
//!
//! The count is shown right away on every repository page, so it is cached per repository and
//! allowed to be a few days old while it is being refreshed in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use super::{CurrentRepository, GraphQlClient, Repository, query_as};
use crate::cache::{CachedFunction, ResultCache};
use crate::error::CacheContents;
use crate::policy::{CachePolicy, PolicyConfig};

/// Identifies this feature in cache keys, logs and metrics.
pub const FEATURE_NAME: &str = "bugs-tab";

/// Stale after half an hour, refreshed in the background for up to 4 days after that.
pub const DEFAULT_POLICY: PolicyConfig = PolicyConfig {
    max_age: Duration::from_secs(30 * 60),
    stale_while_revalidate: Duration::from_secs(4 * 24 * 3600),
};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    search: IssueSearch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueSearch {
    issue_count: u64,
}

/// The cache key of the bug count of `repository`.
pub fn cache_key(repository: &Repository) -> String {
    format!("{FEATURE_NAME}:{repository}")
}

/// The query counting the open bugs of `repository`.
pub fn bug_count_query(repository: &Repository) -> String {
    format!(
        r#"search(type: ISSUE, query: "label:bug is:open is:issue repo:{repository}") {{
            issueCount
        }}"#
    )
}

/// A cached counter of open bugs in the [`CurrentRepository`].
///
/// Every repository gets its own [`CachedFunction`], whose key and producer are bound to that
/// repository. Navigating away while a refresh is pending never mixes up counts.
#[derive(Debug, Clone)]
pub struct BugCounter {
    cache: ResultCache,
    client: Arc<dyn GraphQlClient>,
    current: CurrentRepository,
    policy: PolicyConfig,
    counters: Arc<Mutex<HashMap<Repository, CachedFunction<u64>>>>,
}

impl BugCounter {
    pub fn new(
        cache: &ResultCache,
        client: Arc<dyn GraphQlClient>,
        current: CurrentRepository,
    ) -> Self {
        Self::with_policy(cache, client, current, &DEFAULT_POLICY)
    }

    pub fn with_policy(
        cache: &ResultCache,
        client: Arc<dyn GraphQlClient>,
        current: CurrentRepository,
        policy: &PolicyConfig,
    ) -> Self {
        Self {
            cache: cache.clone(),
            client,
            current,
            policy: *policy,
            counters: Default::default(),
        }
    }

    /// The number of open bugs in the current repository.
    pub async fn count(&self) -> CacheContents<u64> {
        let counter = self.counter_for(self.current.get());
        counter.get().await
    }

    fn counter_for(&self, repository: Repository) -> CachedFunction<u64> {
        let mut counters = self.counters.lock().unwrap();
        counters
            .entry(repository)
            .or_insert_with_key(|repository| self.wrap(repository.clone()))
            .clone()
    }

    fn wrap(&self, repository: Repository) -> CachedFunction<u64> {
        let key = cache_key(&repository);
        let policy = CachePolicy::from_config(&self.policy, move || key.clone());
        let client = Arc::clone(&self.client);

        self.cache.wrap(
            FEATURE_NAME,
            move || {
                let client = Arc::clone(&client);
                let repository = repository.clone();
                async move {
                    tracing::debug!("Counting bugs of {}", repository);
                    let response: SearchResponse =
                        query_as(client.as_ref(), &bug_count_query(&repository)).await?;
                    Ok(response.search.issue_count)
                }
            },
            policy,
        )
    }
}
