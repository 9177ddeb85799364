//! Outbox module
//!
//! The outbox record and the save coordinator that writes it.

mod coordinator;
mod message;

pub use coordinator::{SaveCoordinator, SaveError, SaveOutcome, StagedEntity, Tracked};
pub use message::{NewOutboxMessage, OutboxMessage, OutboxStats, OutboxStatus};
