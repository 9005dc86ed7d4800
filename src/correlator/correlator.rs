//! Request/reply on top of one-way publish.
//!
//! A request goes out carrying a fresh correlation id and the reply pattern.
//! The messenger's consumption loop hands replies back through
//! [`ReplyCorrelator::on_reply`], which wakes the matching caller. The caller
//! blocks on its own channel, never on the consumption loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{CallError, StaleReply};
use super::pending::{PendingCall, PendingReply, PendingTable};
use crate::bus::{Envelope, TopicClient};
use crate::config::{BusConfig, PendingSubscriptionPolicy};
use crate::subscription::SubscriptionManager;

type IdGenerator = dyn Fn() -> String + Send + Sync;

/// Owns every pending call from creation until resolution.
pub struct ReplyCorrelator {
    table: Arc<PendingTable>,
    subscriptions: Arc<SubscriptionManager>,
    policy: PendingSubscriptionPolicy,
    reply_suffix: String,
    next_id: Box<IdGenerator>,
}

impl ReplyCorrelator {
    pub fn new(subscriptions: Arc<SubscriptionManager>, config: &BusConfig) -> Self {
        Self {
            table: Arc::new(PendingTable::default()),
            subscriptions,
            policy: config.pending_subscription.clone(),
            reply_suffix: config.reply_suffix.clone(),
            next_id: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Replace the correlation id generator (UUID v4 by default).
    pub fn with_id_generator<F>(mut self, next_id: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.next_id = Box::new(next_id);
        self
    }

    /// Reply pattern for a request pattern.
    pub fn reply_pattern(&self, pattern: &str) -> String {
        format!("{}{}", pattern, self.reply_suffix)
    }

    /// Send a request and return a handle to wait on.
    ///
    /// Refuses to publish unless the reply pattern is actively consumed.
    pub fn request<C>(
        &self,
        client: &C,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingReply, CallError>
    where
        C: TopicClient + ?Sized,
    {
        let reply_pattern = self.reply_pattern(pattern);
        self.subscriptions.check_ready(&reply_pattern, &self.policy)?;

        let correlation_id = (self.next_id)();
        let (call, rx) = PendingCall::new(correlation_id.clone(), reply_pattern.clone(), timeout);
        let deadline = call.deadline();
        self.table.insert(call)?;

        let envelope = Envelope::request(pattern, payload, correlation_id.clone(), reply_pattern.clone());
        if let Err(e) = client.publish(envelope) {
            warn!(pattern, correlation_id = %correlation_id, error = %e, "request publish failed");
            self.table.remove(&correlation_id);
            return Err(e.into());
        }
        debug!(pattern, correlation_id = %correlation_id, ?timeout, "request sent");

        Ok(PendingReply::new(
            correlation_id,
            reply_pattern,
            timeout,
            deadline,
            rx,
            Arc::clone(&self.table),
        ))
    }

    /// Serialize `payload` as JSON and send it as a request.
    pub fn request_json<C, T>(
        &self,
        client: &C,
        pattern: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<PendingReply, CallError>
    where
        C: TopicClient + ?Sized,
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload).map_err(|e| CallError::Encode(e.to_string()))?;
        self.request(client, pattern, bytes, timeout)
    }

    /// Send a request and block until it resolves.
    pub fn call<C>(
        &self,
        client: &C,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CallError>
    where
        C: TopicClient + ?Sized,
    {
        self.request(client, pattern, payload, timeout)?.wait()
    }

    /// Fulfil the call waiting on `correlation_id`.
    pub fn on_reply(&self, correlation_id: &str, payload: Vec<u8>) -> Result<(), StaleReply> {
        match self.table.remove(correlation_id) {
            Some(call) => {
                debug!(
                    correlation_id,
                    elapsed = ?call.created_at.elapsed(),
                    "reply matched"
                );
                call.resolve(Ok(payload));
                Ok(())
            }
            None => Err(self.stale(correlation_id, "")),
        }
    }

    /// Route a reply envelope to its pending call.
    ///
    /// A reply carrying the error header fails the call with
    /// [`CallError::Remote`]. A reply on the wrong reply pattern is treated as
    /// stale and leaves the pending call untouched.
    pub fn on_reply_envelope(&self, envelope: Envelope) -> Result<(), StaleReply> {
        let Some(correlation_id) = envelope.correlation_id.as_deref() else {
            return Err(self.stale("", &envelope.pattern));
        };

        let removed = self
            .table
            .remove_unless(correlation_id, |call| call.reply_pattern != envelope.pattern);
        let Some(call) = removed else {
            return Err(self.stale(correlation_id, &envelope.pattern));
        };

        debug!(
            correlation_id,
            pattern = %envelope.pattern,
            elapsed = ?call.created_at.elapsed(),
            "reply matched"
        );
        match envelope.error() {
            Some(reason) => call.resolve(Err(CallError::Remote(reason.to_string()))),
            None => call.resolve(Ok(envelope.payload)),
        }
        Ok(())
    }

    /// Fail every in-flight call with a transport error. Returns how many were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        self.abort_all(CallError::Transport(reason.to_string()))
    }

    /// Resolve every in-flight call with `error`.
    pub fn abort_all(&self, error: CallError) -> usize {
        let calls = self.table.drain();
        let count = calls.len();
        for call in calls {
            call.resolve(Err(error.clone()));
        }
        if count > 0 {
            warn!(count, %error, "aborted in-flight calls");
        }
        count
    }

    /// Time out every call whose deadline has passed, even if nobody is waiting.
    pub fn expire_overdue(&self) -> usize {
        let expired = self.table.remove_overdue(Instant::now());
        let count = expired.len();
        for call in expired {
            debug!(correlation_id = %call.correlation_id, "call expired");
            let timeout = call.timeout;
            call.resolve(Err(CallError::Timeout(timeout)));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.table.contains(correlation_id)
    }

    fn stale(&self, correlation_id: &str, pattern: &str) -> StaleReply {
        warn!(correlation_id, pattern, "stale reply discarded");
        StaleReply {
            correlation_id: correlation_id.to_string(),
            pattern: pattern.to_string(),
        }
    }
}
