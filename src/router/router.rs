//! Router: pattern → handler registry and dispatch.
//!
//! `Router` holds at most one handler per pattern. Event handlers consume a
//! payload and return nothing; request handlers return a reply payload that
//! the messenger publishes back to the requester.
//!
//! ## Example
//!
//! ```
//! use pattern_bus::Router;
//!
//! let router = Router::new()
//!     .event("order_created", |ctx| {
//!         let _order = ctx.raw_input();
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! router.dispatch("order_created", br#"{"orderId":1}"#).unwrap();
//! assert!(router.dispatch("order_cancelled", b"{}").unwrap_err().is_unroutable());
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, warn};

use super::context::Context;
use super::error::{DispatchError, HandlerError, RouterError};
use crate::bus::Envelope;

type EventFn = dyn Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync;
type RequestFn = dyn Fn(&Context<'_>) -> Result<Value, HandlerError> + Send + Sync;

enum Handler {
    Event(Box<EventFn>),
    Request(Box<RequestFn>),
}

/// What a successful dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// An event handler ran.
    Consumed,
    /// A request handler ran and produced a reply payload.
    Reply(Vec<u8>),
}

/// Maps patterns to handlers.
///
/// Built once at startup; the messenger takes ownership when it starts, so
/// no handler can be added or removed while messages are flowing.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-way event handler.
    pub fn register<F>(&mut self, pattern: &str, handler: F) -> Result<&mut Self, RouterError>
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert(pattern, Handler::Event(Box::new(handler)))
    }

    /// Register a request handler whose result is sent back to the caller.
    pub fn register_request<F>(
        &mut self,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        F: Fn(&Context<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.insert(pattern, Handler::Request(Box::new(handler)))
    }

    /// Builder form of [`register`](Router::register).
    pub fn event<F>(mut self, pattern: &str, handler: F) -> Result<Self, RouterError>
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(pattern, handler)?;
        Ok(self)
    }

    /// Builder form of [`register_request`](Router::register_request).
    pub fn request<F>(mut self, pattern: &str, handler: F) -> Result<Self, RouterError>
    where
        F: Fn(&Context<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register_request(pattern, handler)?;
        Ok(self)
    }

    fn insert(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self, RouterError> {
        if self.handlers.contains_key(pattern) {
            return Err(RouterError::DuplicatePattern(pattern.to_string()));
        }
        self.handlers.insert(pattern.to_string(), handler);
        Ok(self)
    }

    /// Dispatch a bare payload by pattern.
    pub fn dispatch(&self, pattern: &str, payload: &[u8]) -> Result<(), DispatchError> {
        self.dispatch_envelope(&Envelope::new(pattern, payload.to_vec()))
            .map(|_| ())
    }

    /// Dispatch an envelope to the handler bound to its pattern.
    ///
    /// Handler errors and panics are caught here and reported as
    /// [`DispatchError::Handler`]; nothing escapes to the caller's thread.
    pub fn dispatch_envelope(&self, envelope: &Envelope) -> Result<Dispatched, DispatchError> {
        let pattern = envelope.pattern.as_str();
        let Some(handler) = self.handlers.get(pattern) else {
            warn!(pattern, "unroutable message dropped");
            return Err(DispatchError::Unroutable(pattern.to_string()));
        };

        let ctx = Context::new(envelope);
        let result = match handler {
            Handler::Event(handle) => catch_panic(|| handle(&ctx)).map(|()| Dispatched::Consumed),
            Handler::Request(handle) => {
                catch_panic(|| handle(&ctx)).map(|value| Dispatched::Reply(value.to_string().into_bytes()))
            }
        };

        match result {
            Ok(outcome) => {
                debug!(pattern, "message handled");
                Ok(outcome)
            }
            Err(source) => {
                warn!(pattern, error = %source, "handler failed");
                Err(DispatchError::Handler {
                    pattern: pattern.to_string(),
                    source,
                })
            }
        }
    }

    /// List registered patterns.
    pub fn patterns(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.handlers.contains_key(pattern)
    }

    /// True when `pattern` is bound to a request handler.
    pub fn is_request(&self, pattern: &str) -> bool {
        matches!(self.handlers.get(pattern), Some(Handler::Request(_)))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn catch_panic<T, F>(f: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, HandlerError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(HandlerError::Panicked(message))
        }
    }
}
