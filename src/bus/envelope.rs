//! The message envelope carried over the broker.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header set on a reply when the remote request handler failed.
pub const ERROR_HEADER: &str = "error";

/// A message as it travels between services.
///
/// `correlation_id` and `reply_to` are only set on requests and replies;
/// one-way events leave them empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing key (event name, RPC method name, or reply topic).
    pub pattern: String,
    /// Serialized payload, JSON by convention.
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
    /// Links a request to its reply.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Pattern the requester listens on for the reply.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Free-form string headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl Envelope {
    /// Create a one-way envelope with raw payload bytes.
    pub fn new(pattern: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            pattern: pattern.into(),
            payload,
            correlation_id: None,
            reply_to: None,
            headers: HashMap::new(),
        }
    }

    /// Create a one-way envelope with a JSON-serialized payload.
    pub fn encode<T: Serialize>(
        pattern: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(pattern, serde_json::to_vec(payload)?))
    }

    /// Create a one-way envelope from a JSON value.
    pub fn from_json(pattern: impl Into<String>, payload: &Value) -> Self {
        // Serializing a `Value` cannot fail.
        Self::new(pattern, payload.to_string().into_bytes())
    }

    /// Create a request envelope that expects a reply on `reply_to`.
    pub fn request(
        pattern: impl Into<String>,
        payload: Vec<u8>,
        correlation_id: impl Into<String>,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: Some(reply_to.into()),
            ..Self::new(pattern, payload)
        }
    }

    /// Build the reply to this envelope, if it is a request.
    ///
    /// The reply is addressed to `reply_to` and keeps the correlation id.
    pub fn reply(&self, payload: Vec<u8>) -> Option<Envelope> {
        let reply_to = self.reply_to.as_ref()?;
        let correlation_id = self.correlation_id.as_ref()?;
        let mut reply = Envelope::new(reply_to.clone(), payload);
        reply.correlation_id = Some(correlation_id.clone());
        Some(reply)
    }

    /// Build an error reply to this envelope, if it is a request.
    pub fn reply_error(&self, reason: impl Into<String>) -> Option<Envelope> {
        self.reply(Vec::new())
            .map(|reply| reply.with_header(ERROR_HEADER, reason))
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// True when this envelope asks for a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some() && self.correlation_id.is_some()
    }

    /// The remote failure carried by a reply, if any.
    pub fn error(&self) -> Option<&str> {
        self.header(ERROR_HEADER)
    }

    /// Decode the payload as JSON into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// The payload as JSON. Falls back to a string, then to `null`.
    pub fn json(&self) -> Value {
        if let Ok(value) = serde_json::from_slice::<Value>(&self.payload) {
            return value;
        }
        if let Some(s) = self.payload_str() {
            return Value::String(s.to_string());
        }
        Value::Null
    }

    /// The payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
