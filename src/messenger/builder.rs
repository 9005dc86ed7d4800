//! Explicit assembly and start-up of a [`Messenger`].

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use super::caller::Caller;
use super::consumer::{self, Counters, LoopSettings, Shared};
use super::error::StartError;
use super::messenger::Messenger;
use crate::bus::TopicClient;
use crate::config::BusConfig;
use crate::correlator::ReplyCorrelator;
use crate::router::{Context, HandlerError, Router, RouterError};
use crate::subscription::SubscriptionManager;

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Collects handlers and reply dependencies, then starts the messenger.
///
/// Registration errors are held until [`start`](MessengerBuilder::start) so
/// the builder chains without a `?` on every line.
pub struct MessengerBuilder {
    client: Arc<dyn TopicClient>,
    config: BusConfig,
    router: Router,
    reply_dependencies: Vec<String>,
    id_generator: Option<IdGenerator>,
    caller: Caller,
    error: Option<RouterError>,
}

impl MessengerBuilder {
    pub(crate) fn new(client: Arc<dyn TopicClient>, config: BusConfig) -> Self {
        Self {
            client,
            config,
            router: Router::new(),
            reply_dependencies: Vec::new(),
            id_generator: None,
            caller: Caller::default(),
            error: None,
        }
    }

    /// Handle a one-way event pattern.
    pub fn event<F>(mut self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        if let Err(e) = self.router.register(pattern, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Answer requests on `pattern`.
    pub fn request<F>(mut self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        if let Err(e) = self.router.register_request(pattern, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Use a prebuilt router. Replaces handlers registered so far.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Declare that this service calls `pattern`, so its reply pattern is
    /// subscribed during start-up.
    pub fn expects_replies_from(mut self, pattern: &str) -> Self {
        self.reply_dependencies.push(pattern.to_string());
        self
    }

    /// A handle handlers can use to call other services.
    ///
    /// Calls fail with `Stopped` until [`start`](MessengerBuilder::start)
    /// succeeds. The called patterns still need
    /// [`expects_replies_from`](MessengerBuilder::expects_replies_from).
    pub fn caller(&self) -> Caller {
        self.caller.clone()
    }

    /// Replace the correlation id generator.
    pub fn correlation_ids<F>(mut self, next_id: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.id_generator = Some(Box::new(next_id));
        self
    }

    /// Subscribe everything, then start consuming.
    ///
    /// Handler patterns must subscribe or start-up fails. A reply pattern that
    /// fails to subscribe is recorded as failed: calls that depend on it fail
    /// fast and health reports it.
    pub fn start(self) -> Result<Messenger, StartError> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        self.config.validate()?;

        let config = self.config;
        let client = self.client;
        let router = self.router;

        let reply_patterns: HashSet<String> = self
            .reply_dependencies
            .iter()
            .map(|p| config.reply_pattern(p))
            .collect();
        if let Some(conflict) = reply_patterns.iter().find(|p| router.contains(p)) {
            return Err(StartError::PatternConflict(conflict.clone()));
        }

        let subscriptions = Arc::new(SubscriptionManager::from_config(&config));
        let mut correlator = ReplyCorrelator::new(Arc::clone(&subscriptions), &config);
        if let Some(next_id) = self.id_generator {
            correlator = correlator.with_id_generator(next_id);
        }

        for pattern in router.patterns() {
            subscriptions.ensure_subscribed(&*client, pattern)?;
        }
        for pattern in &reply_patterns {
            if let Err(e) = subscriptions.ensure_subscribed(&*client, pattern) {
                warn!(pattern = %pattern, error = %e, "reply subscription failed; dependent calls will fail");
            }
        }

        let handler_count = router.len();
        let reply_count = reply_patterns.len();
        let shared = Arc::new(Shared {
            client,
            router: Arc::new(router),
            correlator: Arc::new(correlator),
            subscriptions,
            reply_patterns: RwLock::new(reply_patterns),
            counters: Counters::default(),
            alive: AtomicBool::new(false),
        });
        self.caller.bind(&shared);

        let settings = LoopSettings {
            poll_interval: config.poll_interval(),
            worker_lanes: config.worker_lanes,
            lane_capacity: config.lane_capacity,
            max_transport_failures: config.max_transport_failures,
            reconnect_backoff: config.reconnect_backoff(),
        };
        let handle = consumer::spawn(Arc::clone(&shared), settings)?;

        info!(
            client_id = %config.client.client_id,
            handlers = handler_count,
            replies = reply_count,
            "messenger started"
        );

        Ok(Messenger::new(shared, config, Mutex::new(Some(handle))))
    }
}
