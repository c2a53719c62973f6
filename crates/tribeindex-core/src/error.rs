//! Error types for the tribeindex pipeline.

use thiserror::Error;

/// Errors that can occur during ingestion or querying.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("source error: {0}")]
    Source(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid cursor: start_author and start_permlink must be supplied together")]
    InvalidCursor,

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Returns `true` if the error came from an external source and a retry
    /// may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Returns `true` if the error is a request-validation failure that
    /// should surface to the caller rather than be retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidCursor)
    }
}
