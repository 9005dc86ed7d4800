//! Calls from inside handlers.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::consumer::Shared;
use crate::correlator::{CallError, PendingReply};

/// A cloneable handle for calling other services.
///
/// Take one from [`MessengerBuilder::caller`](super::MessengerBuilder::caller)
/// and move it into the handlers that need it. It is bound when the
/// messenger starts. Before that, and once the messenger has stopped, every
/// call fails with [`CallError::Stopped`].
///
/// ## Example
///
/// ```ignore
/// let builder = Messenger::builder(client, config).expects_replies_from("get_user");
/// let auth = builder.caller();
/// let billing = builder
///     .event("order_created", move |ctx| {
///         let order = ctx.input::<OrderCreated>()?;
///         let user: User = auth.call_json("get_user", &GetUser { id: order.user_id }, timeout)?;
///         // ...
///         Ok(())
///     })
///     .start()?;
/// ```
#[derive(Clone, Default)]
pub struct Caller {
    // Weak: handlers holding a caller live inside `Shared`.
    shared: Arc<OnceLock<Weak<Shared>>>,
}

impl Caller {
    pub(crate) fn bound(shared: &Arc<Shared>) -> Self {
        let caller = Self::default();
        caller.bind(shared);
        caller
    }

    pub(crate) fn bind(&self, shared: &Arc<Shared>) {
        let _ = self.shared.set(Arc::downgrade(shared));
    }

    /// True once the messenger has started and until it stops.
    pub fn is_ready(&self) -> bool {
        self.shared().map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Send a request without blocking. Wait on the returned handle.
    pub fn request(
        &self,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingReply, CallError> {
        self.shared()?.request(pattern, payload, timeout)
    }

    /// Send a request and block until its reply, a timeout or a transport failure.
    pub fn call(
        &self,
        pattern: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CallError> {
        self.request(pattern, payload, timeout)?.wait()
    }

    /// Typed [`call`](Caller::call) with JSON on both legs.
    pub fn call_json<Req, Resp>(
        &self,
        pattern: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(payload).map_err(|e| CallError::Encode(e.to_string()))?;
        self.request(pattern, bytes, timeout)?.wait_json()
    }

    fn shared(&self) -> Result<Arc<Shared>, CallError> {
        self.shared
            .get()
            .and_then(Weak::upgrade)
            .ok_or(CallError::Stopped)
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("ready", &self.is_ready())
            .finish()
    }
}
