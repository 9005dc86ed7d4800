use std::collections::BTreeMap;

use serde::Serialize;

use super::consumer::{ConsumerStats, Shared};
use crate::subscription::SubscriptionState;

/// Point-in-time view of a running messenger.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// Alive and every subscription active.
    pub ok: bool,
    /// The consumption loop is running.
    pub alive: bool,
    pub client_id: String,
    pub subscriptions: BTreeMap<String, SubscriptionState>,
    /// Handler patterns, sorted.
    pub patterns: Vec<String>,
    /// Calls waiting for a reply.
    pub pending: usize,
    pub stats: ConsumerStats,
}

impl Health {
    pub(crate) fn collect(shared: &Shared, client_id: &str) -> Self {
        let alive = shared.alive.load(std::sync::atomic::Ordering::SeqCst);
        let subscriptions = shared.subscriptions.snapshot();
        let mut patterns: Vec<String> = shared
            .router
            .patterns()
            .into_iter()
            .map(str::to_string)
            .collect();
        patterns.sort();

        Self {
            ok: alive && subscriptions.values().all(SubscriptionState::is_active),
            alive,
            client_id: client_id.to_string(),
            subscriptions,
            patterns,
            pending: shared.correlator.pending_count(),
            stats: shared.counters.snapshot(),
        }
    }
}
