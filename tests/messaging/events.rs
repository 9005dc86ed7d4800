//! One-way events: routing, unroutable messages, handler failures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pattern_bus::bus::{Envelope, InMemoryBroker, TopicClient};
use pattern_bus::{HandlerError, Messenger, StartError, RouterError};
use serde_json::{json, Value};

use crate::support::{connect, fast_config, init_tracing, wait_until, OrderCreated};

#[test]
fn order_created_reaches_its_handler_once() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();

    let sink = Arc::clone(&seen);
    let billing = Messenger::builder(connect(&broker, &config), config.clone())
        .event("order_created", move |ctx| {
            sink.lock().unwrap().push(ctx.raw_input());
            Ok(())
        })
        .start()
        .unwrap();

    // Another service publishes the event.
    let orders = connect(&broker, &config);
    orders
        .publish(Envelope::from_json("order_created", &json!({ "orderId": 1 })))
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 1));
    let stats = billing.stop();

    assert_eq!(*seen.lock().unwrap(), vec![json!({ "orderId": 1 })]);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.handled, 1);
}

#[test]
fn typed_input_and_headers_reach_the_handler() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");
    let seen: Arc<Mutex<Vec<(OrderCreated, Option<String>)>>> = Arc::default();

    let sink = Arc::clone(&seen);
    let billing = Messenger::builder(connect(&broker, &config), config.clone())
        .event("order_created", move |ctx| {
            let order = ctx.input::<OrderCreated>()?;
            let tenant = ctx.header("tenant").map(str::to_string);
            sink.lock().unwrap().push((order, tenant));
            Ok(())
        })
        .start()
        .unwrap();

    let orders = connect(&broker, &config);
    let envelope = Envelope::encode("order_created", &OrderCreated { order_id: 9, amount: 120 })
        .unwrap()
        .with_header("tenant", "acme");
    orders.publish(envelope).unwrap();

    assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 1));
    billing.stop();

    let (order, tenant) = seen.lock().unwrap()[0].clone();
    assert_eq!(order, OrderCreated { order_id: 9, amount: 120 });
    assert_eq!(tenant.as_deref(), Some("acme"));
}

#[test]
fn handler_failure_is_not_fatal() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");
    let handled: Arc<Mutex<Vec<u64>>> = Arc::default();

    let sink = Arc::clone(&handled);
    let billing = Messenger::builder(connect(&broker, &config), config)
        .event("order_created", move |ctx| {
            let order = ctx.input::<OrderCreated>()?;
            if order.amount < 0 {
                return Err(HandlerError::Rejected("negative amount".into()));
            }
            sink.lock().unwrap().push(order.order_id);
            Ok(())
        })
        .start()
        .unwrap();

    billing
        .emit_json("order_created", &OrderCreated { order_id: 1, amount: -5 })
        .unwrap();
    billing
        .emit_json("order_created", &json!({ "unexpected": true }))
        .unwrap();
    billing
        .emit_json("order_created", &OrderCreated { order_id: 2, amount: 5 })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || handled.lock().unwrap().len() == 1));
    assert!(billing.is_alive());

    let stats = billing.stop();
    assert_eq!(*handled.lock().unwrap(), vec![2]);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.handled, 1);
}

#[test]
fn handler_panic_does_not_kill_its_lane() {
    let broker = InMemoryBroker::new();
    let config = pattern_bus::BusConfig {
        worker_lanes: 1,
        ..fast_config("billing")
    };
    let handled: Arc<Mutex<Vec<u64>>> = Arc::default();

    let sink = Arc::clone(&handled);
    let billing = Messenger::builder(connect(&broker, &config), config)
        .event("order_created", move |ctx| {
            let order = ctx.input::<OrderCreated>()?;
            if order.order_id == 13 {
                panic!("unlucky order");
            }
            sink.lock().unwrap().push(order.order_id);
            Ok(())
        })
        .start()
        .unwrap();

    for id in [12, 13, 14] {
        billing
            .emit_json("order_created", &OrderCreated { order_id: id, amount: 1 })
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || handled.lock().unwrap().len() == 2));
    let stats = billing.stop();

    assert_eq!(*handled.lock().unwrap(), vec![12, 14]);
    assert_eq!(stats.failed, 1);
}

#[test]
fn request_handler_failure_is_returned_to_the_caller() {
    let broker = InMemoryBroker::new();
    let config = fast_config("auth");

    let auth = Messenger::builder(connect(&broker, &config), config.clone())
        .request("get_user", |ctx| {
            let id = ctx.raw_input()["id"].as_u64().unwrap_or_default();
            Err(HandlerError::Rejected(format!("user {id} not found")))
        })
        .start()
        .unwrap();
    let billing = Messenger::builder(connect(&broker, &config), config)
        .expects_replies_from("get_user")
        .start()
        .unwrap();

    let err = billing
        .call_json::<_, Value>("get_user", &json!({ "id": 7 }), Duration::from_secs(2))
        .unwrap_err();

    assert_eq!(
        err,
        pattern_bus::CallError::Remote("rejected: user 7 not found".into())
    );
    billing.stop();
    assert_eq!(auth.stop().failed, 1);
}

#[test]
fn duplicate_handler_fails_start() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");

    let result = Messenger::builder(connect(&broker, &config), config)
        .event("order_created", |_| Ok(()))
        .request("order_created", |_| Ok(json!(null)))
        .start();

    assert!(matches!(
        result,
        Err(StartError::Router(RouterError::DuplicatePattern(ref p))) if p == "order_created"
    ));
}

#[test]
fn handler_and_reply_pattern_cannot_overlap() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");

    let result = Messenger::builder(connect(&broker, &config), config)
        .event("get_user.reply", |_| Ok(()))
        .expects_replies_from("get_user")
        .start();

    assert!(matches!(
        result,
        Err(StartError::PatternConflict(ref p)) if p == "get_user.reply"
    ));
}

#[test]
fn message_without_a_handler_is_counted_as_unroutable() {
    let broker = InMemoryBroker::new();
    let config = fast_config("billing");
    let client = Arc::new(connect(&broker, &config));
    // Subscribed outside the messenger, so nothing handles it.
    client.subscribe("audit_log").unwrap();

    let billing = Messenger::builder(Arc::clone(&client), config)
        .event("order_created", |_| Ok(()))
        .start()
        .unwrap();

    billing.emit("audit_log", b"{}".to_vec()).unwrap();
    billing
        .emit_json("order_created", &OrderCreated { order_id: 1, amount: 5 })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        let stats = billing.stats();
        stats.unroutable == 1 && stats.handled == 1
    }));
    let stats = billing.stop();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.failed, 0);
}
