//! The topic client boundary: everything the messaging core needs from a broker.

use std::sync::Arc;

use super::{Envelope, TransportError};

/// Thin transport wrapper around a publish/subscribe broker connection.
///
/// This is a pull-based interface: the messenger's consumption loop calls
/// [`poll`](TopicClient::poll) and routes whatever comes back. Implementations
/// might include:
/// - `InMemoryClient` - for tests and single-process setups
/// - a Kafka consumer/producer pair
/// - a NATS or Redis Streams connection
pub trait TopicClient: Send + Sync {
    /// Start consuming `pattern`. Returns once the broker acknowledged it.
    fn subscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Publish an envelope to `envelope.pattern`.
    fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Wait up to `timeout_ms` for the next envelope on any subscribed pattern.
    fn poll(&self, timeout_ms: u64) -> Result<Option<Envelope>, TransportError>;

    /// Re-establish a lost connection.
    ///
    /// Subscriptions are re-issued by the caller afterwards.
    fn reconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: TopicClient + ?Sized> TopicClient for Arc<T> {
    fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        (**self).subscribe(pattern)
    }

    fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        (**self).publish(envelope)
    }

    fn poll(&self, timeout_ms: u64) -> Result<Option<Envelope>, TransportError> {
        (**self).poll(timeout_ms)
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        (**self).reconnect()
    }
}
