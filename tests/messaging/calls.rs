//! Request/reply across two services sharing one broker.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pattern_bus::bus::InMemoryBroker;
use pattern_bus::{CallError, Messenger, SubscriptionError, SubscriptionState};

use crate::support::{connect, fast_config, init_tracing, wait_until, GetUser, User};

fn start_auth(broker: &InMemoryBroker) -> Messenger {
    let config = fast_config("auth");
    Messenger::builder(connect(broker, &config), config)
        .request("get_user", |ctx| {
            let query = ctx.input::<GetUser>()?;
            let user = User {
                id: query.id,
                name: format!("user-{}", query.id),
            };
            Ok(serde_json::to_value(user)?)
        })
        .start()
        .unwrap()
}

fn start_billing(broker: &InMemoryBroker) -> Messenger {
    let config = fast_config("billing");
    Messenger::builder(connect(broker, &config), config)
        .expects_replies_from("get_user")
        .start()
        .unwrap()
}

#[test]
fn get_user_round_trip() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let billing = start_billing(&broker);

    assert_eq!(
        billing.subscriptions().get("get_user.reply"),
        Some(&SubscriptionState::Active)
    );

    let user: User = billing
        .call_json("get_user", &GetUser { id: 7 }, Duration::from_secs(2))
        .unwrap();

    assert_eq!(user, User { id: 7, name: "user-7".into() });
    assert_eq!(billing.pending_calls(), 0);

    let billing_stats = billing.stop();
    let auth_stats = auth.stop();
    assert_eq!(billing_stats.replies, 1);
    assert_eq!(billing_stats.stale_replies, 0);
    assert_eq!(auth_stats.handled, 1);
}

#[test]
fn timeout_then_late_reply_is_stale() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let config = fast_config("auth");
    let auth = Messenger::builder(connect(&broker, &config), config)
        .request("get_user", |ctx| {
            thread::sleep(Duration::from_millis(400));
            Ok(ctx.raw_input())
        })
        .start()
        .unwrap();
    let billing = start_billing(&broker);

    let started = Instant::now();
    let err = billing
        .call("get_user", br#"{"id":7}"#.to_vec(), Duration::from_millis(100))
        .unwrap_err();

    assert_eq!(err, CallError::Timeout(Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_millis(350));
    assert_eq!(billing.pending_calls(), 0);

    // The reply still arrives, is discarded, and the messenger keeps going.
    assert!(wait_until(Duration::from_secs(2), || billing.stats().stale_replies == 1));
    assert!(billing.is_alive());
    assert_eq!(billing.stats().replies, 0);

    billing.stop();
    auth.stop();
}

#[test]
fn concurrent_calls_never_cross_replies() {
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let billing = Arc::new(start_billing(&broker));

    let results: Arc<Mutex<Vec<(u64, User)>>> = Arc::default();
    let callers: Vec<_> = (1..=16)
        .map(|id| {
            let billing = Arc::clone(&billing);
            let results = Arc::clone(&results);
            thread::spawn(move || {
                let user: User = billing
                    .call_json("get_user", &GetUser { id }, Duration::from_secs(5))
                    .unwrap();
                results.lock().unwrap().push((id, user));
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 16);
    for (asked, user) in results.iter() {
        assert_eq!(user.id, *asked);
        assert_eq!(user.name, format!("user-{asked}"));
    }

    assert_eq!(billing.stop().replies, 16);
    auth.stop();
}

#[test]
fn request_handle_resolves_off_the_calling_thread() {
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let billing = start_billing(&broker);

    let pending = billing
        .request("get_user", br#"{"id":3}"#.to_vec(), Duration::from_secs(2))
        .unwrap();
    assert_eq!(pending.reply_pattern(), "get_user.reply");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(pending.wait_json::<User>());
    });

    let user = rx.recv_timeout(Duration::from_secs(3)).unwrap().unwrap();
    assert_eq!(user.id, 3);

    billing.stop();
    auth.stop();
}

#[test]
fn cancelled_request_reply_is_stale() {
    let broker = InMemoryBroker::new();
    let config = fast_config("auth");
    let auth = Messenger::builder(connect(&broker, &config), config)
        .request("get_user", |ctx| {
            thread::sleep(Duration::from_millis(50));
            Ok(ctx.raw_input())
        })
        .start()
        .unwrap();
    let billing = start_billing(&broker);

    let pending = billing
        .request("get_user", br#"{"id":1}"#.to_vec(), Duration::from_secs(2))
        .unwrap();
    assert!(pending.cancel());
    assert_eq!(billing.pending_calls(), 0);

    assert!(wait_until(Duration::from_secs(2), || billing.stats().stale_replies == 1));

    billing.stop();
    auth.stop();
}

#[test]
fn call_without_reply_subscription_fails_fast() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");
    let billing = Messenger::builder(connect(&broker, &config), config)
        .start()
        .unwrap();
    let before = broker.publish_count();

    let err = billing
        .call("get_user", b"{}".to_vec(), Duration::from_secs(1))
        .unwrap_err();

    assert_eq!(
        err,
        CallError::Subscription(SubscriptionError::NotSubscribed("get_user.reply".into()))
    );
    assert_eq!(broker.publish_count(), before);
    billing.stop();
}

#[test]
fn replies_can_be_subscribed_after_start() {
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let config = fast_config("billing");
    let billing = Messenger::builder(connect(&broker, &config), config)
        .start()
        .unwrap();

    billing.subscribe_replies("get_user").unwrap();
    let user: User = billing
        .call_json("get_user", &GetUser { id: 11 }, Duration::from_secs(2))
        .unwrap();

    assert_eq!(user.id, 11);
    billing.stop();
    auth.stop();
}

#[test]
fn stopped_messenger_refuses_calls() {
    let broker = InMemoryBroker::new();
    let billing = start_billing(&broker);

    billing.stop();
    // Stopping twice is harmless.
    billing.stop();

    assert!(!billing.is_alive());
    assert_eq!(
        billing.call("get_user", b"{}".to_vec(), Duration::from_secs(1)),
        Err(CallError::Stopped)
    );
}
