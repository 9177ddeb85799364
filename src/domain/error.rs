//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the storage and dispatch layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// An event without a discriminator was raised
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// Price is zero or negative
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Entity was already soft-deleted
    #[error("{entity_type} {id} is already deleted")]
    AlreadyDeleted { entity_type: &'static str, id: Uuid },

    /// Operation not allowed in the current state
    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    /// Business rule violation
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),
}

impl DomainError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::InvalidEvent(_))
    }
}
