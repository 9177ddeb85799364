//! Dispatch module
//!
//! Delivers committed outbox messages to in-process subscribers, at least
//! once, with backoff and dead-lettering.

mod backoff;
mod dispatcher;
mod registry;

pub use backoff::BackoffConfig;
pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher};
pub use registry::{
    Delivery, DeliveryOutcome, EventHandler, RegistryError, SubscriberError, SubscriberFailure,
    SubscriberRegistry,
};
