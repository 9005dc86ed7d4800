//! Wire codecs for [`Envelope`].
//!
//! The serialization format is a transport concern, so topic clients take a
//! codec instead of hard-coding one.

use super::{Envelope, TransportError};

/// Turns envelopes into bytes and back.
pub trait Codec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode an envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, TransportError>;

    /// Decode an envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, TransportError>;
}

/// JSON codec. Payload bytes are carried as base64.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(envelope).map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }
}

/// Compact binary codec backed by bitcode.
#[derive(Clone, Copy, Debug, Default)]
pub struct BitcodeCodec;

impl Codec for BitcodeCodec {
    fn name(&self) -> &'static str {
        "bitcode"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, TransportError> {
        bitcode::serialize(envelope).map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, TransportError> {
        bitcode::deserialize(bytes).map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }
}
