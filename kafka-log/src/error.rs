//! Error types for the log service and its storage backends.
//!
//! Storage errors are split by how the caller must react:
//!
//! - **Transient**: [`StoreError::Unavailable`] is retried after a backoff.
//! - **Fatal**: everything else fails the request that hit it.
//!
//! CAS conflicts are not errors at all; they come back as
//! [`CasOutcome::Conflict`](crate::storage::CasOutcome) so retry loops can
//! match on them directly.

use serde_json::Value;
use thiserror::Error;

use crate::message::ErrorCode;

/// Convenience alias used by the log service.
pub type Result<T> = std::result::Result<T, LogError>;

/// Failures reported by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not answer right now (timeout, overload, abort).
    ///
    /// Safe to retry: the operation either did not happen or is re-checked
    /// by the caller's next read.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error code we have no recovery for.
    #[error("store rejected `{op}` with code {code}: {text}")]
    Rpc {
        op: &'static str,
        code: u32,
        text: String,
    },

    /// A value under one of our keys does not have the shape we wrote.
    #[error("value at `{key}` is not a valid {expected}: {value}")]
    Corrupt {
        key: String,
        expected: &'static str,
        value: Value,
    },

    /// The store replied with a message type that does not answer `op`.
    #[error("unexpected reply to `{op}`: {reply}")]
    UnexpectedReply { op: &'static str, reply: String },

    /// The transport shut down while a call was outstanding.
    #[error("transport disconnected")]
    Disconnected,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Failures of a log operation (`append`, `poll`, `commit`, ...).
#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configured retry budget ran out before the store cooperated.
    #[error("gave up on `{key}` after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: u32 },
}

impl LogError {
    /// Wire error code reported to the client that issued the request.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LogError::RetriesExhausted { .. } => ErrorCode::TemporarilyUnavailable,
            LogError::Store(err) if err.is_transient() => ErrorCode::TemporarilyUnavailable,
            LogError::Store(_) => ErrorCode::Crash,
        }
    }
}
