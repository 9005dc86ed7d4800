//! Two services over one in-memory broker.
//!
//! `auth` answers `get_user`. `billing` reacts to `order_created` events and
//! looks up the ordering user through a request/reply call made from inside
//! its handler.
//!
//! Run with `RUST_LOG=debug cargo run --example billing` to watch the routing.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pattern_bus::bus::InMemoryBroker;
use pattern_bus::{BusConfig, ClientConfig, HandlerError, Messenger};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreated {
    order_id: u64,
    user_id: u64,
    amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GetUser {
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn config(client_id: &str) -> Result<BusConfig, Box<dyn std::error::Error>> {
    let config = BusConfig {
        client: ClientConfig {
            client_id: client_id.to_string(),
            from_beginning: false,
        },
        ..BusConfig::default()
    }
    .apply_env()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let broker = InMemoryBroker::new();

    let auth_config = config("auth")?;
    let auth = Messenger::builder(broker.connect(&auth_config.client)?, auth_config)
        .request("get_user", |ctx| {
            let query = ctx.input::<GetUser>()?;
            let name = match query.id {
                1 => "ada",
                2 => "grace",
                _ => return Err(HandlerError::Rejected(format!("no user {}", query.id))),
            };
            Ok(serde_json::to_value(User {
                id: query.id,
                name: name.to_string(),
            })?)
        })
        .start()?;

    // Billing holds a caller for auth, the way a service holds an injected client.
    let billed: Arc<Mutex<Vec<String>>> = Arc::default();
    let ledger = Arc::clone(&billed);
    let billing_config = config("billing")?;
    let builder = Messenger::builder(broker.connect(&billing_config.client)?, billing_config)
        .expects_replies_from("get_user");
    let auth_client = builder.caller();
    let billing = builder
        .event("order_created", move |ctx| {
            let order = ctx.input::<OrderCreated>()?;
            let line = match auth_client.call_json::<_, User>(
                "get_user",
                &GetUser { id: order.user_id },
                Duration::from_secs(2),
            ) {
                Ok(user) => format!(
                    "billing order {} for {} ({}): {}",
                    order.order_id, user.name, user.id, order.amount
                ),
                Err(e) => format!("cannot bill order {}: {e}", order.order_id),
            };
            ledger.lock().unwrap().push(line);
            Ok(())
        })
        .start()?;

    // An order service publishes three orders.
    let order_config = config("orders")?;
    let shop = Messenger::builder(broker.connect(&order_config.client)?, order_config).start()?;
    for (order_id, user_id, amount) in [(100, 1, 40), (101, 2, 15), (102, 9, 70)] {
        shop.emit_json(
            "order_created",
            &OrderCreated {
                order_id,
                user_id,
                amount,
            },
        )?;
    }

    while billed.lock().unwrap().len() < 3 {
        thread::sleep(Duration::from_millis(10));
    }
    for line in billed.lock().unwrap().iter() {
        println!("{line}");
    }

    println!("{}", serde_json::to_string_pretty(&billing.health())?);

    shop.stop();
    billing.stop();
    auth.stop();
    Ok(())
}
