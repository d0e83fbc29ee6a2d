use thiserror::Error;

/// Errors surfaced by series containers, combinators and the remote
/// chunk facade.
///
/// Optimistic version conflicts are not represented here: readers
/// recover from them locally by retrying and callers never observe
/// them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    KeyNotFound,
    #[error("key is out of order with respect to the series endpoints")]
    OutOfOrder,
    #[error("key already exists")]
    Duplicate,
    #[error("series is completed and can no longer be mutated")]
    Completed,
    #[error("wait for the next element was cancelled")]
    Cancelled,
    #[error("append overlap rejected: {0}")]
    OverlapViolation(&'static str),
    #[error("cannot combine series ordered by different comparers")]
    ComparerMismatch,
    #[error("remote chunk storage failure")]
    Remote(#[source] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
