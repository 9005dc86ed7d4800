pub mod bus;
mod config;
pub mod correlator;
pub mod messenger;
pub mod router;
pub mod subscription;

pub use config::{BusConfig, ClientConfig, ConfigError, PendingSubscriptionPolicy};
pub use correlator::{CallError, PendingReply, ReplyCorrelator, StaleReply};
pub use messenger::{Caller, ConsumerStats, Health, Messenger, MessengerBuilder, StartError};
pub use router::{Context, DispatchError, Dispatched, HandlerError, Router, RouterError};
pub use subscription::{SubscriptionError, SubscriptionManager, SubscriptionState};

// Re-export the transport types services touch most
pub use bus::{Envelope, TopicClient, TransportError};
