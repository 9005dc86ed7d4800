//! Pattern router: maps routing keys to handlers.
//!
//! ## Handler Convention
//!
//! Handlers can live in their own module and be registered with
//! [`register_handlers!`](crate::register_handlers):
//!
//! ```ignore
//! // src/handlers/order_created.rs
//!
//! pub const PATTERN: &str = "order_created";
//!
//! pub fn handle(ctx: &pattern_bus::Context) -> Result<(), pattern_bus::HandlerError> {
//!     let order = ctx.input::<OrderCreated>()?;
//!     // ...
//!     Ok(())
//! }
//! ```

mod context;
mod error;
#[allow(clippy::module_inception)]
mod router;

pub use context::Context;
pub use error::{DispatchError, HandlerError, RouterError};
pub use router::{Dispatched, Router};

/// Register event handler modules with a router using the convention pattern.
///
/// Each handler module must export:
/// - `PATTERN: &str`: the pattern it handles
/// - `handle(ctx) -> Result<(), HandlerError>`: the handler
///
/// Evaluates to `Result<Router, RouterError>`.
///
/// # Example
/// ```ignore
/// let router = pattern_bus::register_handlers!(
///     Router::new(),
///     handlers::order_created,
///     handlers::order_cancelled,
/// )?;
/// ```
#[macro_export]
macro_rules! register_handlers {
    ($router:expr, $( $($seg:ident)::+ ),+ $(,)?) => {{
        let mut router: $crate::Router = $router;
        let mut result: ::std::result::Result<(), $crate::RouterError> = Ok(());
        $(
            if result.is_ok() {
                result = router
                    .register($($seg)::+::PATTERN, $($seg)::+::handle)
                    .map(|_| ());
            }
        )+
        result.map(|()| router)
    }};
}
