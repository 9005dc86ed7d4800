use thiserror::Error;

use crate::config::ConfigError;
use crate::router::RouterError;
use crate::subscription::SubscriptionError;

/// Why a messenger could not start.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A handler registration on the builder was refused.
    #[error(transparent)]
    Router(#[from] RouterError),
    /// A pattern is registered as a handler and also awaited as a reply.
    #[error("pattern {0} is both handled and awaited as a reply")]
    PatternConflict(String),
    /// A handler pattern could not be subscribed, so it would never receive messages.
    #[error("handler subscription failed: {0}")]
    Subscription(#[from] SubscriptionError),
    #[error("could not spawn consumer threads: {0}")]
    Spawn(#[from] std::io::Error),
}
