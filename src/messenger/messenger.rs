//! Messenger: one service's running connection to the bus.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use pattern_bus::bus::InMemoryBroker;
//! use pattern_bus::{BusConfig, Messenger};
//! use serde_json::{json, Value};
//!
//! let broker = InMemoryBroker::new();
//! let config = BusConfig::default();
//!
//! let auth = Messenger::builder(broker.connect(&config.client).unwrap(), config.clone())
//!     .request("get_user", |ctx| {
//!         let id = ctx.raw_input()["id"].clone();
//!         Ok(json!({ "id": id, "name": "ada" }))
//!     })
//!     .start()
//!     .unwrap();
//!
//! let billing = Messenger::builder(broker.connect(&config.client).unwrap(), config)
//!     .expects_replies_from("get_user")
//!     .start()
//!     .unwrap();
//!
//! let user: Value = billing
//!     .call_json("get_user", &json!({ "id": 7 }), Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(user["name"], "ada");
//!
//! billing.stop();
//! auth.stop();
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::builder::MessengerBuilder;
use super::caller::Caller;
use super::consumer::{ConsumerHandle, ConsumerStats, Shared};
use super::health::Health;
use crate::bus::{Envelope, TopicClient, TransportError};
use crate::config::BusConfig;
use crate::correlator::{CallError, PendingReply};
use crate::subscription::{SubscriptionError, SubscriptionState};

/// A started service endpoint: handlers consuming, calls correlated.
pub struct Messenger {
    shared: Arc<Shared>,
    config: BusConfig,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl Messenger {
    /// Start assembling a messenger on top of `client`.
    pub fn builder<C>(client: C, config: BusConfig) -> MessengerBuilder
    where
        C: TopicClient + 'static,
    {
        MessengerBuilder::new(Arc::new(client), config)
    }

    pub(crate) fn new(
        shared: Arc<Shared>,
        config: BusConfig,
        consumer: Mutex<Option<ConsumerHandle>>,
    ) -> Self {
        Self {
            shared,
            config,
            consumer,
        }
    }

    /// Send a request and block until its reply, a timeout or a transport failure.
    pub fn call(
        &self,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CallError> {
        self.request(pattern, payload, timeout)?.wait()
    }

    /// Typed [`call`](Messenger::call) with JSON on both legs.
    pub fn call_json<Req, Resp>(
        &self,
        pattern: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(payload).map_err(|e| CallError::Encode(e.to_string()))?;
        self.request(pattern, bytes, timeout)?.wait_json()
    }

    /// Send a request without blocking. Wait on the returned handle.
    pub fn request(
        &self,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingReply, CallError> {
        self.shared.request(pattern, payload, timeout)
    }

    /// A cloneable handle for making calls through this messenger.
    pub fn caller(&self) -> Caller {
        Caller::bound(&self.shared)
    }

    /// Subscribe to the replies of `pattern` after start-up.
    ///
    /// Must return before the first call to `pattern`. A reply pattern whose
    /// subscription failed earlier is tried again.
    pub fn subscribe_replies(&self, pattern: &str) -> Result<(), SubscriptionError> {
        let reply_pattern = self.config.reply_pattern(pattern);
        if self.shared.router.contains(&reply_pattern) {
            return Err(SubscriptionError::HandledPattern(reply_pattern));
        }
        self.shared
            .reply_patterns
            .write()
            .unwrap()
            .insert(reply_pattern.clone());

        let subscriptions = &self.shared.subscriptions;
        match subscriptions.state(&reply_pattern) {
            SubscriptionState::Failed(_) => {
                subscriptions.resubscribe(&*self.shared.client, &reply_pattern)
            }
            _ => subscriptions.ensure_subscribed(&*self.shared.client, &reply_pattern),
        }
    }

    /// Publish a one-way event.
    pub fn emit(&self, pattern: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        debug!(pattern, "emitting event");
        self.shared.client.publish(Envelope::new(pattern, payload))
    }

    /// Publish a one-way event with a JSON payload.
    pub fn emit_json<T: Serialize + ?Sized>(
        &self,
        pattern: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
        self.emit(pattern, bytes)
    }

    pub fn health(&self) -> Health {
        Health::collect(&self.shared, &self.config.client.client_id)
    }

    /// True while the consumption loop is running.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    pub fn subscriptions(&self) -> BTreeMap<String, SubscriptionState> {
        self.shared.subscriptions.snapshot()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.shared.counters.snapshot()
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Stop consuming, fail outstanding calls and return the final counters.
    ///
    /// Safe to call more than once.
    pub fn stop(&self) -> ConsumerStats {
        let handle = self.consumer.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop();
        }
        self.shared.counters.snapshot()
    }
}
