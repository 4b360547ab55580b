//! Remote lookups enriching repository pages, built on top of the caching primitives.
//!
//! - [`bugs_tab`] counts the open bugs of a repository, cached with stale-while-revalidate.
//! - [`deep_reblame`] resolves the commit to reblame from, deduplicating concurrent lookups.
//!
//! Both talk to the remote API through a [`GraphQlClient`], which takes care of transport and
//! authentication.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheContents, CacheError};

pub mod bugs_tab;
pub mod deep_reblame;

/// Executes GraphQL queries against the remote API.
#[async_trait]
pub trait GraphQlClient: fmt::Debug + Send + Sync {
    /// Runs `query`, returning the `data` of the response.
    async fn query(&self, query: &str) -> CacheContents<serde_json::Value>;
}

/// Runs `query` and decodes the response into `T`.
pub(crate) async fn query_as<T: DeserializeOwned>(
    client: &dyn GraphQlClient,
    query: &str,
) -> CacheContents<T> {
    let data = client.query(query).await?;
    serde_json::from_value(data).map_err(|err| CacheError::Malformed(err.to_string()))
}

/// A repository on the remote, identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// The GraphQL arguments selecting this repository.
    pub fn gql(&self) -> String {
        format!("owner: {:?}, name: {:?}", self.owner, self.name)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The repository of the page currently being enriched.
///
/// This is shared, ambient context: features read it whenever they run, and it changes as the
/// user navigates. Cloning is cheap, all clones observe the same repository.
#[derive(Debug, Clone)]
pub struct CurrentRepository(Arc<RwLock<Repository>>);

impl CurrentRepository {
    pub fn new(repository: Repository) -> Self {
        Self(Arc::new(RwLock::new(repository)))
    }

    pub fn get(&self) -> Repository {
        self.0.read().unwrap().clone()
    }

    pub fn set(&self, repository: Repository) {
        *self.0.write().unwrap() = repository;
    }
}
