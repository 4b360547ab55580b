use std::io;
use std::time::Duration;

use thiserror::Error;

/// An error produced by a wrapped computation.
///
/// These errors are passed through to callers unchanged, and are shared between all the callers
/// of a deduplicated computation, which is why this type is [`Clone`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The remote resource does not exist.
    #[error("not found")]
    NotFound,
    /// The remote resource could not be fetched due to missing permissions.
    ///
    /// The attached string contains the remote's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The remote call did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The remote call failed due to another problem, like connection loss, DNS resolution, or a
    /// 5xx server response.
    #[error("request failed: {0}")]
    RequestFailed(String),
    /// The remote call succeeded, but its response is unusable.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the cache machinery itself.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// Logs an unexpected error and turns it into [`CacheError::InternalError`].
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

/// The result of a wrapped computation: either `Ok(T)` or the reason it failed.
pub type CacheContents<T = ()> = Result<T, CacheError>;

/// An error talking to the durable [`Store`](crate::store::Store).
///
/// The cache never surfaces these to the callers of a cached function. Failed reads are treated
/// like a missing entry, failed writes are logged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the underlying medium failed.
    #[error("store i/o failed")]
    Io(#[from] io::Error),
    /// An entry could not be encoded or decoded.
    #[error("failed to (de)serialize store entry")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// A short tag describing this error, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}
