use thiserror::Error;

use crate::manager::LifecycleState;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("invalid cache generation name {0:?}")]
    InvalidGeneration(String),
}

/// A request that produced no response at all.
///
/// HTTP error statuses are responses, not `NetworkError`s.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network unreachable: {0}")]
    Unreachable(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            NetworkError::Unreachable(e.to_string())
        } else {
            NetworkError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot activate while {0:?}")]
    NotInstalled(LifecycleState),
}
