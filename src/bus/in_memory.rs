//! In-memory broker for testing and single-process scenarios.
//!
//! The broker is an append-only log of encoded records shared by every client
//! connected to it. Each client keeps its own read position and its own
//! subscription set, so several services can share one broker the same way
//! they would share a Kafka cluster.
//!
//! ## Example
//!
//! ```
//! use pattern_bus::bus::{Envelope, InMemoryBroker, TopicClient};
//! use pattern_bus::ClientConfig;
//!
//! let broker = InMemoryBroker::new();
//! let billing = broker.connect(&ClientConfig::default()).unwrap();
//! let orders = broker.connect(&ClientConfig::default()).unwrap();
//!
//! billing.subscribe("order_created").unwrap();
//! orders.publish(Envelope::new("order_created", br#"{"orderId":1}"#.to_vec())).unwrap();
//!
//! let env = billing.poll(100).unwrap().unwrap();
//! assert_eq!(env.pattern, "order_created");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use super::codec::{Codec, JsonCodec};
use super::{Envelope, TopicClient, TransportError};
use crate::config::ClientConfig;

#[derive(Clone, Debug)]
struct Record {
    pattern: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct BrokerState {
    log: RwLock<Vec<Record>>,
    online: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    publishes: AtomicUsize,
    subscribe_attempts: AtomicUsize,
}

/// Shared in-memory broker. Clone it freely; clones share the same log.
///
/// Fault injection:
/// - [`set_online(false)`](InMemoryBroker::set_online) makes every client
///   operation fail with `ConnectionFailed` until it is set back.
/// - [`reject_subscriptions`](InMemoryBroker::reject_subscriptions) makes
///   subscribing to one pattern fail with `Rejected`.
#[derive(Clone, Debug)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty, online broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                log: RwLock::new(Vec::new()),
                online: AtomicBool::new(true),
                rejected: Mutex::new(HashSet::new()),
                publishes: AtomicUsize::new(0),
                subscribe_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Connect a JSON-encoding client.
    pub fn connect(&self, config: &ClientConfig) -> Result<InMemoryClient, TransportError> {
        self.connect_with_codec(config, JsonCodec)
    }

    /// Connect a client that encodes envelopes with `codec`.
    ///
    /// Clients sharing a broker must agree on the codec.
    pub fn connect_with_codec<C: Codec>(
        &self,
        config: &ClientConfig,
        codec: C,
    ) -> Result<InMemoryClient<C>, TransportError> {
        self.ensure_online()?;
        let position = if config.from_beginning { 0 } else { self.len() };
        debug!(client_id = %config.client_id, codec = codec.name(), position, "client connected");
        Ok(InMemoryClient {
            state: Arc::clone(&self.state),
            codec,
            client_id: config.client_id.clone(),
            position: Mutex::new(position),
            subscriptions: RwLock::new(HashMap::new()),
        })
    }

    /// Take the broker offline or bring it back.
    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Make every subscribe to `pattern` fail.
    pub fn reject_subscriptions(&self, pattern: impl Into<String>) {
        self.state.rejected.lock().unwrap().insert(pattern.into());
    }

    /// Undo [`reject_subscriptions`](InMemoryBroker::reject_subscriptions).
    pub fn allow_subscriptions(&self, pattern: &str) {
        self.state.rejected.lock().unwrap().remove(pattern);
    }

    /// Total number of successful publishes.
    pub fn publish_count(&self) -> usize {
        self.state.publishes.load(Ordering::SeqCst)
    }

    /// Total number of subscribe attempts, successful or not.
    pub fn subscribe_attempts(&self) -> usize {
        self.state.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Number of records in the log.
    pub fn len(&self) -> usize {
        self.state.log.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.log.read().unwrap().is_empty()
    }

    /// Patterns of all records, in publish order.
    pub fn patterns(&self) -> Vec<String> {
        self.state
            .log
            .read()
            .unwrap()
            .iter()
            .map(|r| r.pattern.clone())
            .collect()
    }

    /// Decode every record published to `pattern`.
    pub fn find_all_by_pattern<C: Codec>(
        &self,
        codec: &C,
        pattern: &str,
    ) -> Result<Vec<Envelope>, TransportError> {
        self.state
            .log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.pattern == pattern)
            .map(|r| codec.decode(&r.bytes))
            .collect()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransportError::ConnectionFailed("broker offline".into()))
        }
    }
}

/// One service's connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryClient<C: Codec = JsonCodec> {
    state: Arc<BrokerState>,
    codec: C,
    client_id: String,
    /// Next log offset to read.
    position: Mutex<usize>,
    /// Pattern -> log offset at which the subscription took effect.
    subscriptions: RwLock<HashMap<String, usize>>,
}

impl<C: Codec> InMemoryClient<C> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// True when this client consumes `pattern`.
    pub fn is_subscribed(&self, pattern: &str) -> bool {
        self.subscriptions.read().unwrap().contains_key(pattern)
    }

    /// Current read position in the shared log.
    pub fn current_position(&self) -> usize {
        *self.position.lock().unwrap()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.state.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionFailed(format!(
                "{}: broker offline",
                self.client_id
            )))
        }
    }

    /// Scan forward from the read position for a deliverable record.
    fn next_record(&self) -> Option<Record> {
        let log = self.state.log.read().unwrap();
        let subscriptions = self.subscriptions.read().unwrap();
        let mut pos = self.position.lock().unwrap();

        while *pos < log.len() {
            let offset = *pos;
            *pos += 1;
            let record = &log[offset];
            match subscriptions.get(&record.pattern) {
                Some(&since) if offset >= since => return Some(record.clone()),
                _ => {}
            }
        }
        None
    }
}

impl<C: Codec> TopicClient for InMemoryClient<C> {
    fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.state.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if self.state.rejected.lock().unwrap().contains(pattern) {
            return Err(TransportError::Rejected(format!(
                "subscription to {pattern} refused"
            )));
        }
        let offset = self.state.log.read().unwrap().len();
        self.subscriptions
            .write()
            .unwrap()
            .entry(pattern.to_string())
            .or_insert(offset);
        Ok(())
    }

    fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.ensure_online()?;
        let bytes = self.codec.encode(&envelope)?;
        self.state.log.write().unwrap().push(Record {
            pattern: envelope.pattern,
            bytes,
        });
        self.state.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn poll(&self, timeout_ms: u64) -> Result<Option<Envelope>, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            self.ensure_online()?;

            if let Some(record) = self.next_record() {
                return self.codec.decode(&record.bytes).map(Some);
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.ensure_online()
    }
}
