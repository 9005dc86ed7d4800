use std::time::Duration;

use thiserror::Error;

use crate::bus::TransportError;
use crate::subscription::SubscriptionError;

/// Why a request did not produce a reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No reply within the caller's window.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The broker connection failed while the call was in flight.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The reply pattern is not being consumed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// The generated correlation id is already in use.
    #[error("correlation id already pending: {0}")]
    CorrelationIdCollision(String),
    /// The remote request handler failed.
    #[error("remote handler failed: {0}")]
    Remote(String),
    /// The call was cancelled before it resolved.
    #[error("call cancelled")]
    Cancelled,
    /// The request payload could not be serialized.
    #[error("could not encode request: {0}")]
    Encode(String),
    /// The reply payload could not be deserialized.
    #[error("could not decode reply: {0}")]
    Decode(String),
    /// The messenger is no longer consuming, so no reply can arrive.
    #[error("messenger stopped")]
    Stopped,
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Transport(err.to_string())
    }
}

/// A reply arrived for a correlation id with no pending call.
///
/// Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stale reply on {pattern} for correlation id {correlation_id}")]
pub struct StaleReply {
    pub correlation_id: String,
    pub pattern: String,
}
