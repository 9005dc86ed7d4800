//! Subscription failures at start-up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pattern_bus::bus::InMemoryBroker;
use pattern_bus::{
    BusConfig, CallError, Messenger, PendingSubscriptionPolicy, StartError, SubscriptionError,
    SubscriptionState,
};

use crate::support::{connect, fast_config, wait_until};

#[test]
fn rejected_reply_subscription_fails_calls_without_publishing() {
    let broker = InMemoryBroker::new();
    broker.reject_subscriptions("get_user.reply");
    let config = fast_config("billing");

    // Start-up survives; the failure is recorded.
    let billing = Messenger::builder(connect(&broker, &config), config)
        .expects_replies_from("get_user")
        .start()
        .unwrap();
    assert!(matches!(
        billing.subscriptions().get("get_user.reply"),
        Some(SubscriptionState::Failed(_))
    ));

    let err = billing
        .call("get_user", br#"{"id":7}"#.to_vec(), Duration::from_secs(1))
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Subscription(SubscriptionError::Failed { ref pattern, .. }) if pattern == "get_user.reply"
    ));
    assert_eq!(broker.publish_count(), 0);
    assert_eq!(billing.pending_calls(), 0);

    let health = billing.health();
    assert!(health.alive);
    assert!(!health.ok);
    billing.stop();
}

#[test]
fn rejected_subscription_is_retried_before_failing() {
    let broker = InMemoryBroker::new();
    broker.reject_subscriptions("get_user.reply");
    let config = BusConfig {
        subscribe_retries: 2,
        subscribe_backoff_ms: 1,
        ..fast_config("billing")
    };

    let billing = Messenger::builder(connect(&broker, &config), config)
        .expects_replies_from("get_user")
        .start()
        .unwrap();

    assert_eq!(broker.subscribe_attempts(), 3);
    billing.stop();
}

#[test]
fn rejected_handler_subscription_fails_start() {
    let broker = InMemoryBroker::new();
    broker.reject_subscriptions("order_created");
    let config = fast_config("billing");

    let result = Messenger::builder(connect(&broker, &config), config)
        .event("order_created", |_| Ok(()))
        .start();

    assert!(matches!(
        result,
        Err(StartError::Subscription(SubscriptionError::Failed { ref pattern, .. })) if pattern == "order_created"
    ));
}

#[test]
fn invalid_config_fails_start() {
    let broker = InMemoryBroker::new();
    let config = BusConfig {
        worker_lanes: 0,
        ..fast_config("billing")
    };

    let result = Messenger::builder(connect(&broker, &config), config).start();

    assert!(matches!(result, Err(StartError::Config(_))));
}

#[test]
fn wait_policy_still_fails_unknown_patterns() {
    let broker = InMemoryBroker::new();
    let config = BusConfig {
        pending_subscription: PendingSubscriptionPolicy::Wait { timeout_ms: 50 },
        ..fast_config("billing")
    };
    let billing = Messenger::builder(connect(&broker, &config), config)
        .start()
        .unwrap();

    let err = billing
        .call("get_user", b"{}".to_vec(), Duration::from_secs(1))
        .unwrap_err();

    assert_eq!(
        err,
        CallError::Subscription(SubscriptionError::NotSubscribed("get_user.reply".into()))
    );
    billing.stop();
}

#[test]
fn failed_reply_subscription_can_be_retried_explicitly() {
    let broker = InMemoryBroker::new();
    broker.reject_subscriptions("get_user.reply");
    let config = fast_config("billing");
    let billing = Messenger::builder(connect(&broker, &config), config)
        .expects_replies_from("get_user")
        .start()
        .unwrap();
    assert!(billing.subscribe_replies("get_user").is_err());

    broker.allow_subscriptions("get_user.reply");
    billing.subscribe_replies("get_user").unwrap();

    assert_eq!(
        billing.subscriptions().get("get_user.reply"),
        Some(&SubscriptionState::Active)
    );
    assert!(billing.health().ok);
    billing.stop();
}

#[test]
fn reply_subscription_refuses_a_handled_pattern() {
    let broker = InMemoryBroker::new();
    let config = fast_config("audit");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let audit = Messenger::builder(connect(&broker, &config), config)
        .event("get_user.reply", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .start()
        .unwrap();

    assert_eq!(
        audit.subscribe_replies("get_user"),
        Err(SubscriptionError::HandledPattern("get_user.reply".into()))
    );

    // The handler still owns the pattern.
    audit.emit("get_user.reply", b"{}".to_vec()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || seen.load(Ordering::SeqCst) == 1));
    assert_eq!(audit.stop().stale_replies, 0);
}
