//! Pending call table and the caller-side handle.
//!
//! Every pending call owns the sending half of a one-slot channel. The only
//! way to resolve a call is to remove it from the table first, so whichever
//! path wins the removal (reply, timeout, cancel, transport failure) is the
//! only one that can ever send.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::CallError;

pub(crate) type CallResult = Result<Vec<u8>, CallError>;

/// One outgoing request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub(crate) correlation_id: String,
    pub(crate) reply_pattern: String,
    pub(crate) created_at: Instant,
    pub(crate) timeout: Duration,
    slot: SyncSender<CallResult>,
}

impl PendingCall {
    pub(crate) fn new(
        correlation_id: String,
        reply_pattern: String,
        timeout: Duration,
    ) -> (Self, Receiver<CallResult>) {
        let (slot, rx) = sync_channel(1);
        let call = Self {
            correlation_id,
            reply_pattern,
            created_at: Instant::now(),
            timeout,
            slot,
        };
        (call, rx)
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.created_at + self.timeout
    }

    /// Consume the call and hand its result to the waiter.
    pub(crate) fn resolve(self, result: CallResult) {
        // The waiter may already be gone (handle dropped); nothing to do then.
        let _ = self.slot.try_send(result);
    }
}

/// Correlation id -> pending call.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingTable {
    pub(crate) fn insert(&self, call: PendingCall) -> Result<(), CallError> {
        let mut calls = self.lock();
        if calls.contains_key(&call.correlation_id) {
            return Err(CallError::CorrelationIdCollision(call.correlation_id));
        }
        calls.insert(call.correlation_id.clone(), call);
        Ok(())
    }

    pub(crate) fn remove(&self, correlation_id: &str) -> Option<PendingCall> {
        self.lock().remove(correlation_id)
    }

    /// Remove the call only if `keep_if` rejects it.
    pub(crate) fn remove_unless<F>(&self, correlation_id: &str, keep_if: F) -> Option<PendingCall>
    where
        F: FnOnce(&PendingCall) -> bool,
    {
        let mut calls = self.lock();
        match calls.get(correlation_id) {
            Some(call) if !keep_if(call) => calls.remove(correlation_id),
            _ => None,
        }
    }

    /// Remove every call whose deadline is at or before `now`.
    pub(crate) fn remove_overdue(&self, now: Instant) -> Vec<PendingCall> {
        let mut calls = self.lock();
        let overdue: Vec<String> = calls
            .values()
            .filter(|c| c.deadline() <= now)
            .map(|c| c.correlation_id.clone())
            .collect();
        overdue
            .iter()
            .filter_map(|id| calls.remove(id))
            .collect()
    }

    pub(crate) fn drain(&self) -> Vec<PendingCall> {
        self.lock().drain().map(|(_, call)| call).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.calls.lock().unwrap()
    }
}

/// Caller-side handle for an in-flight request.
///
/// Resolves exactly once: with the reply, a timeout, a transport failure or
/// cancellation. Dropping an unresolved handle cancels the call.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    reply_pattern: String,
    timeout: Duration,
    deadline: Instant,
    rx: Receiver<CallResult>,
    table: Arc<PendingTable>,
    resolved: bool,
}

impl PendingReply {
    pub(crate) fn new(
        correlation_id: String,
        reply_pattern: String,
        timeout: Duration,
        deadline: Instant,
        rx: Receiver<CallResult>,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            correlation_id,
            reply_pattern,
            timeout,
            deadline,
            rx,
            table,
            resolved: false,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Pattern the reply is expected on.
    pub fn reply_pattern(&self) -> &str {
        &self.reply_pattern
    }

    /// Block until the call resolves or its timeout elapses.
    pub fn wait(mut self) -> Result<Vec<u8>, CallError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        self.wait_for(remaining)
    }

    /// Block for at most `wait`, without giving up on the call.
    ///
    /// Returns `None` if nothing arrived in time; the call stays pending until
    /// its own deadline.
    pub fn wait_timeout(&mut self, wait: Duration) -> Option<Result<Vec<u8>, CallError>> {
        if self.resolved {
            return None;
        }
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if wait < remaining {
            match self.rx.recv_timeout(wait) {
                Ok(result) => {
                    self.resolved = true;
                    Some(result)
                }
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    self.resolved = true;
                    Some(Err(CallError::Cancelled))
                }
            }
        } else {
            Some(self.wait_for(remaining))
        }
    }

    /// Block until resolution and decode the JSON reply into `T`.
    pub fn wait_json<T: DeserializeOwned>(self) -> Result<T, CallError> {
        let bytes = self.wait()?;
        serde_json::from_slice(&bytes).map_err(|e| CallError::Decode(e.to_string()))
    }

    /// Check for a result without blocking.
    pub fn try_result(&mut self) -> Option<Result<Vec<u8>, CallError>> {
        if self.resolved {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.resolved = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.resolved = true;
                Some(Err(CallError::Cancelled))
            }
        }
    }

    /// Cancel the call. Returns `false` if it had already resolved.
    pub fn cancel(mut self) -> bool {
        self.cancel_inner()
    }

    fn cancel_inner(&mut self) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        match self.table.remove(&self.correlation_id) {
            Some(call) => {
                debug!(correlation_id = %self.correlation_id, "call cancelled");
                call.resolve(Err(CallError::Cancelled));
                true
            }
            None => false,
        }
    }

    fn wait_for(&mut self, wait: Duration) -> Result<Vec<u8>, CallError> {
        match self.rx.recv_timeout(wait) {
            Ok(result) => {
                self.resolved = true;
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                self.resolved = true;
                match self.table.remove(&self.correlation_id) {
                    Some(_) => {
                        debug!(correlation_id = %self.correlation_id, "call timed out");
                        Err(CallError::Timeout(self.timeout))
                    }
                    // Another path removed the call and is delivering its result.
                    None => self.rx.recv().unwrap_or(Err(CallError::Cancelled)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.resolved = true;
                Err(CallError::Cancelled)
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}
