//! HTTP health endpoint for a running messenger.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /health`: the [`Health`](super::Health) report as JSON. Status is
//!   `503` when the loop has stopped or a subscription is not active.
//!
//! ## Example
//!
//! ```ignore
//! let messenger = Arc::new(Messenger::builder(client, config).start()?);
//!
//! // Compose with other axum routes
//! let app = pattern_bus::messenger::http::router(messenger.clone());
//!
//! // Or serve directly
//! pattern_bus::messenger::http::serve(messenger, "0.0.0.0:3000").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::Messenger;

/// Build an axum `Router` exposing the messenger's health.
pub fn router(messenger: Arc<Messenger>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(messenger)
}

/// Serve the health endpoint at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(messenger: Arc<Messenger>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(messenger);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health_handler(State(messenger): State<Arc<Messenger>>) -> impl IntoResponse {
    let health = messenger.health();
    let status = if health.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
