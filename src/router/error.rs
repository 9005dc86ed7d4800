//! Error types for pattern routing.

use thiserror::Error;

use crate::correlator::CallError;

/// A failure escaping a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload decode / deserialization failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// Business logic rejected the message.
    #[error("rejected: {0}")]
    Rejected(String),
    /// A call the handler made to another service failed.
    #[error("call failed: {0}")]
    Call(#[from] CallError),
    /// The handler panicked; caught at the dispatch boundary.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

/// Registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// A handler is already bound to this pattern.
    #[error("pattern already registered: {0}")]
    DuplicatePattern(String),
}

/// Why a message was not handled.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler matches the pattern. The message is dropped.
    #[error("unroutable message: no handler for pattern {0}")]
    Unroutable(String),
    /// The handler ran and failed.
    #[error("handler for {pattern} failed: {source}")]
    Handler {
        pattern: String,
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    pub fn is_unroutable(&self) -> bool {
        matches!(self, DispatchError::Unroutable(_))
    }
}
