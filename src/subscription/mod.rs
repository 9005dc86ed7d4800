//! Subscription manager: makes reply patterns consumable before requests go out.

mod error;
mod manager;

pub use error::SubscriptionError;
pub use manager::{SubscriptionManager, SubscriptionState};
