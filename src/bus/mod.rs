//! Topic client boundary: envelopes, codecs and broker connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Messenger (per service)                   │
//! │  - consumption loop: poll() -> route                        │
//! │  - emit() / call() -> publish()                             │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TopicClient trait                       │
//! │  subscribe(pattern) / publish(envelope) / poll(timeout)     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────┐    ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryBroker│    │ KafkaClient │    │   NatsClient        │
//! │  (included)  │    │ (external)  │    │   (external)        │
//! └──────────────┘    └─────────────┘    └─────────────────────┘
//! ```

mod client;
mod codec;
mod envelope;
mod error;
mod in_memory;

pub use client::TopicClient;
pub use codec::{BitcodeCodec, Codec, JsonCodec};
pub use envelope::{Envelope, ERROR_HEADER};
pub use error::TransportError;
pub use in_memory::{InMemoryBroker, InMemoryClient};
