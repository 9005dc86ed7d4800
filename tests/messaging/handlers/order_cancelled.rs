//! Handler: order_cancelled

use pattern_bus::{Context, HandlerError};

pub const PATTERN: &str = "order_cancelled";

pub fn handle(ctx: &Context) -> Result<(), HandlerError> {
    match ctx.raw_input()["orderId"].as_u64() {
        Some(_) => Ok(()),
        None => Err(HandlerError::DecodeFailed("missing orderId".into())),
    }
}
