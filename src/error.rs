//! Error types for the feed core.

use thiserror::Error;

use crate::envelope::ContentKey;

/// A raw item (or page) that does not satisfy the envelope contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The value was not a JSON object.
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A field is present but has the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    /// The content-kind annotation names a kind this client does not know.
    #[error("unknown content kind `{0}`")]
    UnknownKind(String),
}

impl DecodeError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Error type for fetch and mutation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Transport-level failure, including timeouts. Retryable.
    #[error("network error: {0}")]
    Network(String),
    /// The backend answered with a non-2xx status and a message.
    #[error("backend error {status}: {message}")]
    Backend { status: u16, message: String },
    /// The response violated the page contract.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// An interaction targeted an item that is not in any cached page.
    #[error("content {0} is not cached")]
    NotCached(ContentKey),
    /// A shared lock was poisoned by a panicking holder.
    #[error("feed lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl FeedError {
    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }

    pub(crate) fn timeout(operation: &str, after: std::time::Duration) -> Self {
        FeedError::Network(format!(
            "{} timed out after {}ms",
            operation,
            after.as_millis()
        ))
    }
}

/// Configuration loading failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    /// A value parsed but is out of range.
    #[error("{0}")]
    OutOfRange(String),
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
