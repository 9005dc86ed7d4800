use thiserror::Error;

/// A reply pattern is not consumable, so requests depending on it must not be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The broker refused the subscription after every retry.
    #[error("subscription to {pattern} failed: {reason}")]
    Failed { pattern: String, reason: String },
    /// The subscription is still being established.
    #[error("subscription to {0} is still being established")]
    Pending(String),
    /// The pattern already has a handler in this service, so replies on it
    /// would never reach the caller.
    #[error("{0} is handled by this service and cannot carry replies")]
    HandledPattern(String),
    /// Nobody asked for this pattern during startup.
    #[error("{0} is not subscribed; ensure it is subscribed before sending requests")]
    NotSubscribed(String),
}
