//! Health endpoint tests.
//!
//! Starts an axum server and exercises it with reqwest.

use std::sync::Arc;

use pattern_bus::bus::InMemoryBroker;
use pattern_bus::messenger::http;
use pattern_bus::Messenger;

use crate::support::{connect, fast_config};

/// Bind to port 0 and return the actual address.
async fn start_server(messenger: Arc<Messenger>) -> String {
    let app = http::router(messenger);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn billing(broker: &InMemoryBroker) -> Arc<Messenger> {
    let config = fast_config("billing");
    Arc::new(
        Messenger::builder(connect(broker, &config), config)
            .event("order_created", |_| Ok(()))
            .expects_replies_from("get_user")
            .start()
            .unwrap(),
    )
}

#[tokio::test]
async fn health_check() {
    let broker = InMemoryBroker::new();
    let messenger = billing(&broker);
    let base = start_server(messenger.clone()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["alive"], true);
    assert_eq!(body["client_id"], "billing");
    assert_eq!(body["patterns"], serde_json::json!(["order_created"]));
    assert_eq!(body["subscriptions"]["get_user.reply"]["state"], "active");
    assert_eq!(body["pending"], 0);
    assert!(body["stats"]["polls"].is_number());

    messenger.stop();
}

#[tokio::test]
async fn failed_subscription_is_unhealthy() {
    let broker = InMemoryBroker::new();
    broker.reject_subscriptions("get_user.reply");
    let messenger = billing(&broker);
    let base = start_server(messenger.clone()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["subscriptions"]["get_user.reply"]["state"], "failed");
    assert!(body["subscriptions"]["get_user.reply"]["reason"].is_string());

    messenger.stop();
}

#[tokio::test]
async fn stopped_messenger_is_unhealthy() {
    let broker = InMemoryBroker::new();
    let messenger = billing(&broker);
    messenger.stop();

    let base = start_server(messenger).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();

    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["alive"], false);
}
