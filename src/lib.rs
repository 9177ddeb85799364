//! commerce_outbox Library
//!
//! Transactional outbox for event-bearing entities: atomic save of state and
//! events, at-least-once dispatch to subscribers, soft-delete query filters.

pub mod aggregate;
pub mod api;
pub mod dispatch;
pub mod domain;
pub mod filters;
pub mod outbox;
pub mod store;
pub mod subscribers;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::{DomainError, DomainEvent, EntityBase, OrderEvent, ProductEvent};
pub use outbox::{OutboxMessage, OutboxStatus, SaveCoordinator, SaveError, SaveOutcome};
