use thiserror::Error;

/// Broker connection or IO failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the broker failed or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Encoding or decoding an envelope failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// The broker refused the operation.
    #[error("rejected by broker: {0}")]
    Rejected(String),
    /// Timed out waiting for the broker.
    #[error("broker timeout")]
    Timeout,
    /// Other error.
    #[error("transport error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// True when the connection itself is gone and a reconnect is needed.
    ///
    /// A `Timeout` is a slow broker, not a lost one: in-flight calls keep
    /// their own deadlines.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::ConnectionFailed(_))
    }
}
