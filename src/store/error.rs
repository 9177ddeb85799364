//! Store Errors
//!
//! Error types for persistence operations.

use uuid::Uuid;

/// Errors that can occur in the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict on an entity row
    #[error("Concurrency conflict for {entity_type} {id}: expected version {expected}")]
    ConcurrencyConflict {
        entity_type: &'static str,
        id: Uuid,
        expected: i64,
    },

    /// Outbox message not found
    #[error("Outbox message not found: {0}")]
    NotFound(Uuid),

    /// Operation does not apply to the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }

    /// Check if retrying the whole unit of work may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. }
                | StoreError::Unavailable(_)
                | StoreError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_retryable() {
        let conflict = StoreError::ConcurrencyConflict {
            entity_type: "Order",
            id: Uuid::new_v4(),
            expected: 1,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_concurrency_conflict());

        let unavailable = StoreError::Unavailable("connection reset".to_string());
        assert!(unavailable.is_retryable());

        let not_found = StoreError::NotFound(Uuid::new_v4());
        assert!(!not_found.is_retryable());
    }
}
