//! Handlers that call other services while they run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pattern_bus::bus::InMemoryBroker;
use pattern_bus::{BusConfig, CallError, Messenger};

use crate::support::{connect, fast_config, init_tracing, wait_until, GetUser, OrderCreated, User};

fn start_auth(broker: &InMemoryBroker) -> Messenger {
    let config = fast_config("auth");
    Messenger::builder(connect(broker, &config), config)
        .request("get_user", |ctx| {
            let query = ctx.input::<GetUser>()?;
            Ok(serde_json::to_value(User {
                id: query.id,
                name: format!("user-{}", query.id),
            })?)
        })
        .start()
        .unwrap()
}

/// Billing looks up the ordering user from inside its `order_created` handler.
fn start_billing(
    broker: &InMemoryBroker,
    config: BusConfig,
) -> (Messenger, Arc<Mutex<Vec<Result<u64, CallError>>>>) {
    let lookups: Arc<Mutex<Vec<Result<u64, CallError>>>> = Arc::default();
    let sink = Arc::clone(&lookups);

    let builder = Messenger::builder(connect(broker, &config), config).expects_replies_from("get_user");
    let auth = builder.caller();
    let billing = builder
        .event("order_created", move |ctx| {
            let order = ctx.input::<OrderCreated>()?;
            let lookup = auth
                .call_json::<_, User>(
                    "get_user",
                    &GetUser { id: order.order_id },
                    Duration::from_millis(500),
                )
                .map(|user| user.id);
            sink.lock().unwrap().push(lookup);
            Ok(())
        })
        .start()
        .unwrap();

    (billing, lookups)
}

#[test]
fn handler_looks_up_user_through_its_caller() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let (billing, lookups) = start_billing(&broker, fast_config("billing"));

    billing
        .emit_json("order_created", &OrderCreated { order_id: 7, amount: 40 })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || lookups.lock().unwrap().len() == 1));
    assert_eq!(*lookups.lock().unwrap(), vec![Ok(7)]);

    let stats = billing.stop();
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.handled, 1);
    auth.stop();
}

#[test]
fn replies_keep_flowing_while_the_only_lane_is_full() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let config = BusConfig {
        worker_lanes: 1,
        lane_capacity: 1,
        ..fast_config("billing")
    };
    let (billing, lookups) = start_billing(&broker, config);

    // Every handler blocks on a call, so the lane backs up behind it.
    for order_id in 1..=4 {
        billing
            .emit_json("order_created", &OrderCreated { order_id, amount: 10 })
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || lookups.lock().unwrap().len() == 4));
    assert_eq!(*lookups.lock().unwrap(), vec![Ok(1), Ok(2), Ok(3), Ok(4)]);

    let stats = billing.stop();
    assert_eq!(stats.replies, 4);
    assert_eq!(stats.stale_replies, 0);
    assert_eq!(stats.dispatched, 4);
    auth.stop();
}

#[test]
fn caller_works_only_while_the_messenger_runs() {
    let broker = InMemoryBroker::new();
    let auth = start_auth(&broker);
    let config = fast_config("billing");
    let builder = Messenger::builder(connect(&broker, &config), config).expects_replies_from("get_user");
    let caller = builder.caller();

    assert!(!caller.is_ready());
    assert_eq!(
        caller.call("get_user", br#"{"id":1}"#.to_vec(), Duration::from_secs(1)),
        Err(CallError::Stopped)
    );

    let billing = builder.start().unwrap();
    assert!(caller.is_ready());
    let user: User = caller
        .call_json("get_user", &GetUser { id: 3 }, Duration::from_secs(2))
        .unwrap();
    assert_eq!(user.name, "user-3");

    billing.stop();
    assert!(!caller.is_ready());
    assert_eq!(
        caller.call("get_user", br#"{"id":1}"#.to_vec(), Duration::from_secs(1)),
        Err(CallError::Stopped)
    );
    auth.stop();
}
