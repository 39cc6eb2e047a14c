//! # Capitais Error Types
//!
//! Aggregates the error kinds produced by the dispatch and watchdog core:
//! transient failures of the keyed store / repository, malformed payloads,
//! and the terminal "no accounts bound" outcome.

use thiserror::Error;

/// Errors surfaced by the [`KeyedStore`](crate::store::KeyedStore) client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store command failed: {0}")]
    Command(String),
}

/// Errors surfaced by the [`Repository`](crate::repo::Repository) client.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(value: sqlx::Error) -> Self {
        Self::Query(value.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(value: redis::RedisError) -> Self {
        if value.is_timeout() || value.is_connection_dropped() || value.is_connection_refusal() {
            Self::Connection(value.to_string())
        } else {
            Self::Command(value.to_string())
        }
    }
}

/// Central error type for the dispatch/watchdog core.
///
/// Mirrors the error taxonomy of the spec it implements: `Validation` for
/// malformed caller input, `NoAccountsFound` for the terminal non-failure
/// outcome of a request with no bound accounts, `TransientStore` for
/// store/repository I/O failures, `PayloadCorrupt` for undecodable JSON under
/// an existing credential, and `Internal` for anything unexpected.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no accounts bound to robot")]
    NoAccountsFound,

    #[error("transient store/repository failure: {0}")]
    TransientStore(String),

    #[error("payload under existing credential could not be parsed: {0}")]
    PayloadCorrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Machine-readable code surfaced to callers, matching the structured
    /// outcome codes named by the spec (`NO_ACCOUNTS_FOUND`, `INTERNAL_ERROR`, ...).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NoAccountsFound => "NO_ACCOUNTS_FOUND",
            Self::TransientStore(_) => "INTERNAL_ERROR",
            Self::PayloadCorrupt(_) => "INTERNAL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(value: StoreError) -> Self {
        Self::TransientStore(value.to_string())
    }
}

impl From<RepoError> for DispatchError {
    fn from(value: RepoError) -> Self {
        Self::TransientStore(value.to_string())
    }
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
