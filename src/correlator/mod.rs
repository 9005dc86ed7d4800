//! Reply correlator: matches replies to outstanding requests.

#[allow(clippy::module_inception)]
mod correlator;
mod error;
mod pending;

pub use correlator::ReplyCorrelator;
pub use error::{CallError, StaleReply};
pub use pending::PendingReply;
