use std::fmt::{Debug, Formatter};
use thiserror::Error;

/// Failures reported by a [`ChallengeStore`](crate::store::ChallengeStore).
///
/// Absence is an expected condition (the CA may poll for tokens we never wrote, or already
/// cleaned up), so it gets its own variant instead of hiding inside a backend error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Challenge not found in the store")]
    NotFound,
    #[error("The store rate limited us, try again later")]
    RateLimited,
    #[error("Challenge store failure: {0:#}")]
    Backend(anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type IssueResult<T> = Result<T, IssueError>;

/// Terminal failure of a single issuance attempt.
pub enum IssueError {
    /// The request itself is unusable (e.g. no domains)
    Validation(anyhow::Error),
    Store(StoreError),
    /// The CA, the trust store or another backend failed
    Upstream(anyhow::Error),
}

impl std::error::Error for IssueError {}

impl std::fmt::Display for IssueError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            IssueError::Validation(err) => write!(f, "Invalid request: {err:#}"),
            IssueError::Store(err) => std::fmt::Display::fmt(err, f),
            IssueError::Upstream(err) => Debug::fmt(err, f),
        }
    }
}

impl Debug for IssueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl From<StoreError> for IssueError {
    fn from(err: StoreError) -> Self {
        IssueError::Store(err)
    }
}

impl From<anyhow::Error> for IssueError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_error) => IssueError::Store(store_error),
            Err(err) => IssueError::Upstream(err),
        }
    }
}

pub trait IssueContext<T> {
    fn validation_failure(self) -> IssueResult<T>;
    fn upstream_failure(self) -> IssueResult<T>;
}

impl<T> IssueContext<T> for anyhow::Error {
    fn validation_failure(self) -> IssueResult<T> {
        Err(IssueError::Validation(self))
    }

    fn upstream_failure(self) -> IssueResult<T> {
        Err(IssueError::Upstream(self))
    }
}

impl<T> IssueContext<T> for Result<T, anyhow::Error> {
    fn validation_failure(self) -> IssueResult<T> {
        match self {
            Ok(ok) => Ok(ok),
            Err(err) => err.validation_failure(),
        }
    }

    fn upstream_failure(self) -> IssueResult<T> {
        match self {
            Ok(ok) => Ok(ok),
            Err(err) => err.upstream_failure(),
        }
    }
}
