//! Context passed to handlers.
//!
//! Wraps the inbound envelope. Handlers read the payload, headers and
//! pattern through it.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::HandlerError;
use crate::bus::Envelope;

/// The context passed to every handler.
///
/// ## Example
///
/// ```ignore
/// pub fn handle(ctx: &Context) -> Result<(), HandlerError> {
///     let order = ctx.input::<OrderCreated>()?;
///     // ...
///     Ok(())
/// }
/// ```
pub struct Context<'a> {
    envelope: &'a Envelope,
}

impl<'a> Context<'a> {
    pub(crate) fn new(envelope: &'a Envelope) -> Self {
        Self { envelope }
    }

    /// Deserialize the JSON payload into a typed struct.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        self.envelope
            .decode()
            .map_err(|e| HandlerError::DecodeFailed(e.to_string()))
    }

    /// The payload as JSON (string or `null` if it is not JSON).
    pub fn raw_input(&self) -> Value {
        self.envelope.json()
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    /// The pattern this message was routed by.
    pub fn pattern(&self) -> &str {
        &self.envelope.pattern
    }

    /// Look up an inbound header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.envelope.header(key)
    }

    /// Correlation id, present on requests.
    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id.as_deref()
    }

    /// The whole inbound envelope.
    pub fn envelope(&self) -> &Envelope {
        self.envelope
    }
}
