//! Reblames a line from before the pull request that last touched it.
//!
//! Blame views attribute a line to the merge commit of a squashed pull request. To reblame from
//! before that change, the last commit of the pull request itself is needed, which takes a
//! round-trip to the remote. Concurrent lookups of the same commit share that round-trip.

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CurrentRepository, GraphQlClient, Repository, query_as};
use crate::dedup::CallDeduplicator;
use crate::error::{CacheContents, CacheError};

pub const FEATURE_NAME: &str = "deep-reblame";

/// Identifies a single lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct BlameRequest {
    repository: Repository,
    commit: String,
    pr_number: u64,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct BlameResponse {
    repository: BlameRepository,
}

#[derive(Debug, Deserialize)]
struct BlameRepository {
    file: Option<IgnoredAny>,
    object: Option<Commit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Commit {
    associated_pull_requests: Option<Nodes<PullRequest>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    number: u64,
    merge_commit: Option<Oid>,
    commits: Nodes<PullRequestCommit>,
}

#[derive(Debug, Deserialize)]
struct PullRequestCommit {
    commit: Oid,
}

#[derive(Debug, Deserialize)]
struct Oid {
    oid: String,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

/// The query looking up the pull request that created `commit`, and whether `filename` exists
/// at that commit.
pub fn blame_query(repository: &Repository, commit: &str, filename: &str) -> String {
    format!(
        r#"repository({repo}) {{
            file: object(expression: "{commit}:{filename}") {{
                ... on Blob {{
                    id
                }}
            }}
            object(expression: "{commit}") {{
                ... on Commit {{
                    associatedPullRequests(last: 1) {{
                        nodes {{
                            number
                            mergeCommit {{
                                oid
                            }}
                            commits(last: 1) {{
                                nodes {{
                                    commit {{
                                        oid
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}
        }}"#,
        repo = repository.gql(),
    )
}

/// Picks the last commit of the pull request out of a lookup response.
fn blame_commit(request: &BlameRequest, response: BlameResponse) -> CacheContents<String> {
    let BlameRepository { file, object } = response.repository;

    let pull_request = object
        .and_then(|commit| commit.associated_pull_requests)
        .and_then(|prs| prs.nodes.into_iter().next())
        .filter(|pr| {
            pr.number == request.pr_number
                && pr
                    .merge_commit
                    .as_ref()
                    .is_some_and(|merge| merge.oid == request.commit)
        })
        .ok_or_else(|| {
            CacheError::Malformed("the PR linked in the title didn't create this commit".into())
        })?;

    if file.is_none() {
        return Err(CacheError::Malformed(
            "the file was renamed and can't be found".into(),
        ));
    }

    pull_request
        .commits
        .nodes
        .into_iter()
        .next()
        .map(|node| node.commit.oid)
        .ok_or_else(|| CacheError::Malformed("the PR has no commits".into()))
}

/// Resolves the commit to reblame from, for lines attributed to a pull request.
#[derive(Debug, Clone)]
pub struct BlameResolver {
    current: CurrentRepository,
    lookups: CallDeduplicator<BlameRequest, String>,
}

impl BlameResolver {
    pub fn new(client: Arc<dyn GraphQlClient>, current: CurrentRepository) -> Self {
        let lookups = CallDeduplicator::new(FEATURE_NAME, move |request: BlameRequest| {
            let client = Arc::clone(&client);
            async move {
                tracing::debug!(
                    commit = %request.commit,
                    pr = request.pr_number,
                    "Resolving blame commit of {}",
                    request.filename
                );
                let query = blame_query(&request.repository, &request.commit, &request.filename);
                let response = query_as(client.as_ref(), &query).await?;
                blame_commit(&request, response)
            }
        });

        Self { current, lookups }
    }

    /// Returns the last commit of pull request `pr_number`, given its merge `commit`.
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::Malformed`] if `commit` was not created by merging `pr_number`,
    /// or if `filename` does not exist at `commit`.
    pub async fn resolve(
        &self,
        commit: &str,
        pr_number: u64,
        filename: &str,
    ) -> CacheContents<String> {
        let request = BlameRequest {
            repository: self.current.get(),
            commit: commit.to_owned(),
            pr_number,
            filename: filename.to_owned(),
        };
        self.lookups.call(request).await
    }
}

/// The blame page of `line` at `commit`, given the blame page at `reference` it is reached from.
pub fn reblame_url(
    location: &Url,
    reference: &str,
    commit: &str,
    line: u32,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&location.as_str().replacen(reference, commit, 1))?;
    url.set_fragment(Some(&format!("L{line}")));
    Ok(url)
}
