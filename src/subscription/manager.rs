//! Tracks which patterns this service is consuming.
//!
//! Each pattern moves through `unsubscribed → subscribing → {active | failed}`
//! exactly once per attempt. A broker reconnect re-runs `subscribing` for
//! active and failed patterns alike; nothing ever goes back to `unsubscribed`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::SubscriptionError;
use crate::bus::TopicClient;
use crate::config::{BusConfig, PendingSubscriptionPolicy};

/// Where a pattern's subscription stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Failed(String),
}

impl SubscriptionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionState::Active)
    }
}

/// Owns the subscription record table.
pub struct SubscriptionManager {
    records: Mutex<HashMap<String, SubscriptionState>>,
    /// Signalled whenever a pattern leaves `Subscribing`.
    settled: Condvar,
    retries: u32,
    backoff: Duration,
}

impl SubscriptionManager {
    /// `retries` extra attempts, `backoff` apart, before a pattern is marked failed.
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            settled: Condvar::new(),
            retries,
            backoff,
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.subscribe_retries, config.subscribe_backoff())
    }

    /// Make sure `client` consumes `pattern`.
    ///
    /// Idempotent: once a pattern is active or failed, later calls return the
    /// recorded outcome without touching the broker. A concurrent call for a
    /// pattern that is mid-subscribe waits for that attempt to settle.
    pub fn ensure_subscribed<C>(&self, client: &C, pattern: &str) -> Result<(), SubscriptionError>
    where
        C: TopicClient + ?Sized,
    {
        {
            let mut records = self.lock();
            loop {
                match records.get(pattern) {
                    Some(SubscriptionState::Active) => return Ok(()),
                    Some(SubscriptionState::Failed(reason)) => {
                        return Err(SubscriptionError::Failed {
                            pattern: pattern.to_string(),
                            reason: reason.clone(),
                        })
                    }
                    Some(SubscriptionState::Subscribing) => {
                        records = self.settled.wait(records).unwrap();
                    }
                    Some(SubscriptionState::Unsubscribed) | None => {
                        records.insert(pattern.to_string(), SubscriptionState::Subscribing);
                        break;
                    }
                }
            }
        }

        let outcome = self.attempt(client, pattern);
        self.settle(pattern, outcome)
    }

    /// Retry `subscribing` for one pattern regardless of its current state.
    pub fn resubscribe<C>(&self, client: &C, pattern: &str) -> Result<(), SubscriptionError>
    where
        C: TopicClient + ?Sized,
    {
        self.lock()
            .insert(pattern.to_string(), SubscriptionState::Subscribing);
        let outcome = self.attempt(client, pattern);
        self.settle(pattern, outcome)
    }

    /// Re-run `subscribing` for every active or failed pattern, e.g. after a
    /// reconnect. A pattern that failed while the broker was away gets
    /// another chance here.
    ///
    /// Returns the patterns that failed.
    pub fn resubscribe_all<C>(&self, client: &C) -> Vec<SubscriptionError>
    where
        C: TopicClient + ?Sized,
    {
        let settled: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, state)| {
                matches!(state, SubscriptionState::Active | SubscriptionState::Failed(_))
            })
            .map(|(pattern, _)| pattern.clone())
            .collect();

        settled
            .iter()
            .filter_map(|pattern| self.resubscribe(client, pattern).err())
            .collect()
    }

    /// Gate for outgoing requests: is `pattern` consumable right now?
    pub fn check_ready(
        &self,
        pattern: &str,
        policy: &PendingSubscriptionPolicy,
    ) -> Result<(), SubscriptionError> {
        let mut records = self.lock();

        if matches!(records.get(pattern), Some(SubscriptionState::Subscribing)) {
            if let PendingSubscriptionPolicy::Wait { timeout_ms } = policy {
                debug!(pattern, timeout_ms, "waiting for subscription to settle");
                records = self
                    .settled
                    .wait_timeout_while(records, Duration::from_millis(*timeout_ms), |r| {
                        matches!(r.get(pattern), Some(SubscriptionState::Subscribing))
                    })
                    .unwrap()
                    .0;
            }
        }

        match records.get(pattern) {
            Some(SubscriptionState::Active) => Ok(()),
            Some(SubscriptionState::Subscribing) => {
                Err(SubscriptionError::Pending(pattern.to_string()))
            }
            Some(SubscriptionState::Failed(reason)) => Err(SubscriptionError::Failed {
                pattern: pattern.to_string(),
                reason: reason.clone(),
            }),
            Some(SubscriptionState::Unsubscribed) | None => {
                Err(SubscriptionError::NotSubscribed(pattern.to_string()))
            }
        }
    }

    pub fn state(&self, pattern: &str) -> SubscriptionState {
        self.lock()
            .get(pattern)
            .cloned()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Every record, sorted by pattern.
    pub fn snapshot(&self) -> BTreeMap<String, SubscriptionState> {
        self.lock()
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect()
    }

    pub fn all_active(&self) -> bool {
        self.lock().values().all(SubscriptionState::is_active)
    }

    pub fn has_failures(&self) -> bool {
        self.lock()
            .values()
            .any(|s| matches!(s, SubscriptionState::Failed(_)))
    }

    fn attempt<C>(&self, client: &C, pattern: &str) -> Result<(), String>
    where
        C: TopicClient + ?Sized,
    {
        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            match client.subscribe(pattern) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(pattern, attempt, error = %e, "subscribe attempt failed");
                    last_error = e.to_string();
                    if attempt < self.retries {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(last_error)
    }

    fn settle(&self, pattern: &str, outcome: Result<(), String>) -> Result<(), SubscriptionError> {
        let mut records = self.lock();
        let result = match outcome {
            Ok(()) => {
                info!(pattern, "subscription active");
                records.insert(pattern.to_string(), SubscriptionState::Active);
                Ok(())
            }
            Err(reason) => {
                warn!(pattern, %reason, "subscription failed");
                records.insert(pattern.to_string(), SubscriptionState::Failed(reason.clone()));
                Err(SubscriptionError::Failed {
                    pattern: pattern.to_string(),
                    reason,
                })
            }
        };
        self.settled.notify_all();
        result
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SubscriptionState>> {
        self.records.lock().unwrap()
    }
}
