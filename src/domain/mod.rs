//! Domain module
//!
//! Core domain types: the event-bearing entity base, events, and errors.

pub mod entity;
pub mod error;
pub mod events;

pub use entity::{CommitReceipt, EntityBase};
pub use error::DomainError;
pub use events::{DomainEvent, OrderEvent, PendingEvent, ProductEvent};
