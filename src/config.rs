//! Messenger configuration.
//!
//! Loaded from JSON with every field optional, then overridden from
//! `PATTERN_BUS_*` environment variables.
//!
//! ```
//! use pattern_bus::BusConfig;
//!
//! let config = BusConfig::from_json(r#"{ "client": { "client_id": "billing" } }"#).unwrap();
//! assert_eq!(config.client.client_id, "billing");
//! assert_eq!(config.reply_suffix, ".reply");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
    /// A field holds a value the messenger cannot run with.
    #[error("invalid config field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Connection settings handed to `connect`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identifies this service to the broker.
    pub client_id: String,
    /// Read the log from the start instead of from the current end.
    pub from_beginning: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "pattern-bus".to_string(),
            from_beginning: false,
        }
    }
}

/// What `call()` does when its reply pattern is still being subscribed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PendingSubscriptionPolicy {
    /// Fail immediately with `SubscriptionError::Pending`.
    #[default]
    FailFast,
    /// Wait up to `timeout_ms` for the subscription to settle.
    Wait { timeout_ms: u64 },
}

/// Top-level messenger configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub client: ClientConfig,
    /// Appended to a request pattern to name its reply pattern.
    pub reply_suffix: String,
    /// Timeout used by `call()` when none is given.
    pub default_timeout_ms: u64,
    /// How long one poll of the topic client may block.
    pub poll_interval_ms: u64,
    /// Number of dispatch worker threads.
    pub worker_lanes: usize,
    /// Bounded queue size per worker lane.
    pub lane_capacity: usize,
    /// Extra subscribe attempts before a subscription is marked failed.
    pub subscribe_retries: u32,
    pub subscribe_backoff_ms: u64,
    pub pending_subscription: PendingSubscriptionPolicy,
    /// Consecutive failed polls (each followed by a reconnect) before the loop gives up.
    pub max_transport_failures: u32,
    pub reconnect_backoff_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            reply_suffix: ".reply".to_string(),
            default_timeout_ms: 5_000,
            poll_interval_ms: 50,
            worker_lanes: 4,
            lane_capacity: 1_024,
            subscribe_retries: 3,
            subscribe_backoff_ms: 100,
            pending_subscription: PendingSubscriptionPolicy::FailFast,
            max_transport_failures: 5,
            reconnect_backoff_ms: 200,
        }
    }
}

impl BusConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PATTERN_BUS_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(client_id) = lookup("PATTERN_BUS_CLIENT_ID") {
            self.client.client_id = client_id;
        }
        if let Some(suffix) = lookup("PATTERN_BUS_REPLY_SUFFIX") {
            self.reply_suffix = suffix;
        }
        if let Some(v) = parse_env(&lookup, "PATTERN_BUS_DEFAULT_TIMEOUT_MS")? {
            self.default_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "PATTERN_BUS_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "PATTERN_BUS_WORKER_LANES")? {
            self.worker_lanes = v;
        }
        if let Some(v) = parse_env(&lookup, "PATTERN_BUS_SUBSCRIBE_RETRIES")? {
            self.subscribe_retries = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that the messenger can run with these values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.client_id.is_empty() {
            return Err(invalid("client.client_id", "must not be empty"));
        }
        if self.reply_suffix.is_empty() {
            return Err(invalid("reply_suffix", "must not be empty"));
        }
        if self.default_timeout_ms == 0 {
            return Err(invalid("default_timeout_ms", "must be greater than zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }
        if self.worker_lanes == 0 {
            return Err(invalid("worker_lanes", "must be greater than zero"));
        }
        if self.lane_capacity == 0 {
            return Err(invalid("lane_capacity", "must be greater than zero"));
        }
        if self.max_transport_failures == 0 {
            return Err(invalid("max_transport_failures", "must be greater than zero"));
        }
        Ok(())
    }

    /// Reply pattern for a request pattern (`get_user` -> `get_user.reply`).
    pub fn reply_pattern(&self, pattern: &str) -> String {
        format!("{}{}", pattern, self.reply_suffix)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn subscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.subscribe_backoff_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn parse_env<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}
