//! The consumption loop and its worker lanes.
//!
//! One thread polls the topic client. Replies are resolved right there; every
//! other message goes to the lane its pattern hashes to, so messages for one
//! pattern are handled in arrival order while different patterns run side by
//! side. The loop never blocks on a lane: a full lane parks its messages in
//! a backlog that is retried in order every cycle, so replies keep flowing
//! while handlers wait on calls of their own.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{
    self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError,
};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::bus::{Envelope, TopicClient};
use crate::correlator::{CallError, PendingReply, ReplyCorrelator};
use crate::router::{DispatchError, Dispatched, Router};
use crate::subscription::SubscriptionManager;

/// Counters from the consumption loop.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Envelopes pulled from the broker.
    pub received: usize,
    /// Envelopes handed to a worker lane.
    pub dispatched: usize,
    /// Messages a handler processed successfully.
    pub handled: usize,
    /// Messages whose handler returned an error or panicked.
    pub failed: usize,
    /// Messages with no handler.
    pub unroutable: usize,
    /// Replies matched to a pending call.
    pub replies: usize,
    /// Replies with no pending call.
    pub stale_replies: usize,
    pub transport_errors: usize,
    /// Poll cycles completed.
    pub polls: usize,
}

/// Live counters shared between the loop, the lanes and health reporting.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    received: AtomicUsize,
    dispatched: AtomicUsize,
    handled: AtomicUsize,
    failed: AtomicUsize,
    unroutable: AtomicUsize,
    replies: AtomicUsize,
    stale_replies: AtomicUsize,
    transport_errors: AtomicUsize,
    polls: AtomicUsize,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            stale_replies: self.stale_replies.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared by the messenger and its consumption loop.
pub(crate) struct Shared {
    pub(crate) client: Arc<dyn TopicClient>,
    pub(crate) router: Arc<Router>,
    pub(crate) correlator: Arc<ReplyCorrelator>,
    pub(crate) subscriptions: Arc<SubscriptionManager>,
    /// Patterns whose inbound messages are replies to our own requests.
    pub(crate) reply_patterns: RwLock<HashSet<String>>,
    pub(crate) counters: Counters,
    pub(crate) alive: AtomicBool,
}

impl Shared {
    pub(crate) fn is_reply_pattern(&self, pattern: &str) -> bool {
        self.reply_patterns.read().unwrap().contains(pattern)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Publish a request unless the loop that would route its reply is gone.
    pub(crate) fn request(
        &self,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingReply, CallError> {
        if !self.is_alive() {
            return Err(CallError::Stopped);
        }
        self.correlator
            .request(&*self.client, pattern, payload, timeout)
    }
}

/// Loop tuning, taken from `BusConfig` at start.
#[derive(Debug, Clone)]
pub(crate) struct LoopSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) worker_lanes: usize,
    pub(crate) lane_capacity: usize,
    pub(crate) max_transport_failures: u32,
    pub(crate) reconnect_backoff: Duration,
}

/// Handle to the running loop. Dropping it signals the loop to stop.
pub(crate) struct ConsumerHandle {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Stop the loop and wait for it and its lanes to finish.
    pub(crate) fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("consumption loop panicked");
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Spawn the lanes and the consumption loop.
pub(crate) fn spawn(shared: Arc<Shared>, settings: LoopSettings) -> std::io::Result<ConsumerHandle> {
    let (stop_tx, stop_rx) = mpsc::channel();

    let mut senders = Vec::with_capacity(settings.worker_lanes);
    let mut workers = Vec::with_capacity(settings.worker_lanes);
    for lane in 0..settings.worker_lanes {
        let (tx, rx) = mpsc::sync_channel(settings.lane_capacity);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("pattern-bus-lane-{lane}"))
            .spawn(move || run_lane(lane, worker_shared, rx))?;
        senders.push(tx);
        workers.push(worker);
    }

    shared.alive.store(true, Ordering::SeqCst);
    let handle = thread::Builder::new()
        .name("pattern-bus-consumer".to_string())
        .spawn(move || {
            let mut lanes = Lanes::new(senders);
            run_loop(&shared, &settings, &mut lanes, &stop_rx);
            // Lanes drain what they already hold, then exit.
            lanes.close(&shared);
            for worker in workers {
                if worker.join().is_err() {
                    error!("worker lane panicked");
                }
            }
            info!("consumption loop stopped");
        })?;

    Ok(ConsumerHandle {
        stop_tx,
        handle: Some(handle),
    })
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn run_loop(
    shared: &Shared,
    settings: &LoopSettings,
    lanes: &mut Lanes,
    stop_rx: &Receiver<()>,
) {
    let poll_ms = settings.poll_interval.as_millis() as u64;
    let mut consecutive_failures = 0u32;

    info!(lanes = lanes.len(), poll_ms, "consumption loop started");

    loop {
        if stop_requested(stop_rx) {
            break;
        }

        bump(&shared.counters.polls);
        shared.correlator.expire_overdue();
        lanes.flush(shared);

        match shared.client.poll(poll_ms) {
            Ok(Some(envelope)) => {
                consecutive_failures = 0;
                on_message(shared, lanes, envelope);
            }
            Ok(None) => consecutive_failures = 0,
            Err(e) if e.is_connection_loss() => {
                bump(&shared.counters.transport_errors);
                consecutive_failures += 1;
                shared.correlator.fail_all(&e.to_string());

                if consecutive_failures >= settings.max_transport_failures {
                    error!(
                        failures = consecutive_failures,
                        error = %e,
                        "giving up on broker connection"
                    );
                    break;
                }

                warn!(attempt = consecutive_failures, error = %e, "broker connection lost");
                match stop_rx.recv_timeout(settings.reconnect_backoff) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                reconnect(shared);
            }
            Err(e) => {
                bump(&shared.counters.transport_errors);
                warn!(error = %e, "poll failed");
            }
        }
    }

    // Nothing can resolve these once the loop is gone.
    shared.alive.store(false, Ordering::SeqCst);
    shared.correlator.abort_all(CallError::Stopped);
}

fn reconnect(shared: &Shared) {
    match shared.client.reconnect() {
        Ok(()) => {
            info!("reconnected to broker");
            for failure in shared.subscriptions.resubscribe_all(&*shared.client) {
                warn!(error = %failure, "resubscribe after reconnect failed");
            }
        }
        Err(e) => warn!(error = %e, "reconnect failed"),
    }
}

/// Route one inbound envelope.
fn on_message(shared: &Shared, lanes: &mut Lanes, envelope: Envelope) {
    bump(&shared.counters.received);

    if shared.is_reply_pattern(&envelope.pattern) {
        match shared.correlator.on_reply_envelope(envelope) {
            Ok(()) => bump(&shared.counters.replies),
            Err(_) => bump(&shared.counters.stale_replies),
        }
        return;
    }

    let lane = lane_for(&envelope.pattern, lanes.len());
    debug!(pattern = %envelope.pattern, lane, parked = lanes.parked(lane), "dispatching");
    lanes.push(shared, lane, envelope);
}

/// Senders to the worker lanes, each with a backlog for when it is full.
struct Lanes {
    senders: Vec<SyncSender<Envelope>>,
    backlog: Vec<VecDeque<Envelope>>,
}

impl Lanes {
    fn new(senders: Vec<SyncSender<Envelope>>) -> Self {
        let backlog = senders.iter().map(|_| VecDeque::new()).collect();
        Self { senders, backlog }
    }

    fn len(&self) -> usize {
        self.senders.len()
    }

    /// Messages parked behind a full lane.
    fn parked(&self, lane: usize) -> usize {
        self.backlog[lane].len()
    }

    /// Queue `envelope` behind whatever is already parked for `lane`.
    fn push(&mut self, shared: &Shared, lane: usize, envelope: Envelope) {
        self.backlog[lane].push_back(envelope);
        self.flush_lane(shared, lane);
    }

    /// Hand parked messages over until each lane is full again.
    fn flush(&mut self, shared: &Shared) {
        for lane in 0..self.len() {
            self.flush_lane(shared, lane);
        }
    }

    fn flush_lane(&mut self, shared: &Shared, lane: usize) {
        let queue = &mut self.backlog[lane];
        while let Some(envelope) = queue.pop_front() {
            match self.senders[lane].try_send(envelope) {
                Ok(()) => bump(&shared.counters.dispatched),
                Err(TrySendError::Full(envelope)) => {
                    queue.push_front(envelope);
                    return;
                }
                Err(TrySendError::Disconnected(envelope)) => {
                    error!(lane, pattern = %envelope.pattern, "worker lane is gone; message dropped");
                }
            }
        }
    }

    /// Block until every parked message is handed over, then close the lanes.
    fn close(self, shared: &Shared) {
        for (lane, (sender, queue)) in self.senders.into_iter().zip(self.backlog).enumerate() {
            for envelope in queue {
                if sender.send(envelope).is_err() {
                    error!(lane, "worker lane is gone; parked messages dropped");
                    break;
                }
                bump(&shared.counters.dispatched);
            }
        }
    }
}

fn lane_for(pattern: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    pattern.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

fn run_lane(lane: usize, shared: Arc<Shared>, rx: Receiver<Envelope>) {
    debug!(lane, "worker lane started");
    for envelope in rx {
        match shared.router.dispatch_envelope(&envelope) {
            Ok(Dispatched::Consumed) => bump(&shared.counters.handled),
            Ok(Dispatched::Reply(payload)) => {
                bump(&shared.counters.handled);
                match envelope.reply(payload) {
                    Some(reply) => respond(&*shared.client, reply),
                    None => debug!(pattern = %envelope.pattern, "request without reply address"),
                }
            }
            Err(DispatchError::Unroutable(_)) => bump(&shared.counters.unroutable),
            Err(DispatchError::Handler { source, .. }) => {
                bump(&shared.counters.failed);
                if let Some(reply) = envelope.reply_error(source.to_string()) {
                    respond(&*shared.client, reply);
                }
            }
        }
    }
    debug!(lane, "worker lane stopped");
}

fn respond(client: &dyn TopicClient, reply: Envelope) {
    let pattern = reply.pattern.clone();
    if let Err(e) = client.publish(reply) {
        warn!(%pattern, error = %e, "could not publish reply");
    }
}
