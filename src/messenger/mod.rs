//! Messenger: wires a topic client, router, correlator and subscription
//! manager into one running service endpoint.
//!
//! Start-up is explicit. [`Messenger::builder`] collects handlers and reply
//! dependencies; [`MessengerBuilder::start`] subscribes every handler pattern
//! and every reply pattern, and only then starts the consumption loop and
//! accepts calls.

mod builder;
mod caller;
mod consumer;
mod error;
mod health;
#[allow(clippy::module_inception)]
mod messenger;

#[cfg(feature = "http")]
pub mod http;

pub use builder::MessengerBuilder;
pub use caller::Caller;
pub use consumer::ConsumerStats;
pub use error::StartError;
pub use health::Health;
pub use messenger::Messenger;
