use serde::{Deserialize, Serialize};
use thiserror::Error;

use threadmark_common::{MessageId, ThreadRef, ThreadmarkError};

/// Transient transport failure. Retried with backoff before it surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("malformed page: {message}")]
    Malformed { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        FetchError::Malformed {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Data-integrity problem on the source side. Never retried.
    #[error("thread {0} has no messages")]
    EmptyThread(ThreadRef),
}

/// A second, different resolution proposed for a thread that already has one.
/// The first committed entry stands.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("thread {thread_ref} already resolved to {existing}, rejected {proposed}")]
pub struct RegistryConflict {
    pub thread_ref: ThreadRef,
    pub existing: MessageId,
    pub proposed: MessageId,
}

/// Failures that end a whole session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("listing source unavailable: {0}")]
    ListingUnavailable(#[source] FetchError),

    #[error(transparent)]
    Common(#[from] ThreadmarkError),
}

/// Whether an error is worth another attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        true
    }
}

impl Retryable for ExpandError {
    fn is_transient(&self) -> bool {
        matches!(self, ExpandError::Fetch(_))
    }
}
