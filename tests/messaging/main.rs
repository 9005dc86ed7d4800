//! Messaging integration tests.

mod events;
mod calls;
mod handler_calls;
mod failures;

#[cfg(feature = "http")]
mod http;
