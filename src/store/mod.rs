//! Store module
//!
//! Persistence seams for the outbox subsystem.
//! `PgStore` is the production implementation; `InMemoryStore` applies the
//! same contracts in memory for tests and local development.

mod error;
mod in_memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::filters::QueryFilter;
use crate::outbox::{NewOutboxMessage, OutboxMessage, OutboxStats};

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

/// Generic row shape shared by every entity table
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EntityRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub version: i64,

    /// Serialized aggregate state (pending events excluded)
    pub data: serde_json::Value,
}

/// One entity insert or update inside a unit of work
#[derive(Debug, Clone)]
pub struct EntityWrite {
    pub entity_type: &'static str,
    pub table: &'static str,

    /// Version the entity was loaded at; 0 inserts a new row
    pub expected_version: i64,

    /// Row to store, already carrying `expected_version + 1`
    pub row: EntityRow,
}

/// Everything one save commits, applied all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub writes: Vec<EntityWrite>,

    /// In raise order
    pub messages: Vec<NewOutboxMessage>,
}

impl UnitOfWork {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.messages.is_empty()
    }
}

/// Claim parameters for one dispatcher cycle
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub batch_size: usize,
    pub lease: Duration,
    pub now: DateTime<Utc>,
}

impl ClaimRequest {
    pub fn lease_expires_at(&self) -> Result<DateTime<Utc>, StoreError> {
        chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| self.now.checked_add_signed(lease))
            .ok_or_else(|| StoreError::InvalidState(format!("lease {:?} out of range", self.lease)))
    }
}

/// Failed delivery to record on a claimed message
#[derive(Debug, Clone)]
pub struct FailureUpdate {
    pub id: Uuid,
    pub lease_token: Uuid,
    pub error: String,

    /// Ceiling; exceeding it dead-letters the message
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Result of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub retry_count: i32,
    pub dead_lettered: bool,
}

/// Applies a unit of work in one transaction
#[async_trait]
pub trait UnitOfWorkStore: Send + Sync {
    /// Persist entity writes and outbox messages atomically, returning the stored messages
    async fn commit(&self, unit: UnitOfWork) -> Result<Vec<OutboxMessage>, StoreError>;
}

/// Which rows of an entity table a read may see.
///
/// Only [`crate::filters::Repository`] builds one, so a read either applies
/// a registered query filter or goes through the repository's audited
/// bypass.
///
/// ```compile_fail
/// use commerce_outbox::store::RowScope;
///
/// let scope = RowScope::unfiltered();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RowScope<'a> {
    filter: Option<&'a QueryFilter>,
}

impl<'a> RowScope<'a> {
    pub(crate) fn filtered(filter: &'a QueryFilter) -> Self {
        Self {
            filter: Some(filter),
        }
    }

    pub(crate) fn unfiltered() -> Self {
        Self { filter: None }
    }

    /// The filter to apply, `None` for an audited bypass
    pub fn filter(&self) -> Option<&'a QueryFilter> {
        self.filter
    }

    pub fn admits(&self, row: &EntityRow) -> bool {
        self.filter.map_or(true, |f| f.matches(row))
    }
}

/// Reads entity rows within a scope
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch_row(
        &self,
        table: &'static str,
        id: Uuid,
        scope: RowScope<'_>,
    ) -> Result<Option<EntityRow>, StoreError>;

    async fn fetch_rows(
        &self,
        table: &'static str,
        scope: RowScope<'_>,
    ) -> Result<Vec<EntityRow>, StoreError>;
}

/// Dispatcher and operator access to the outbox table
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Lease a batch of claimable messages, oldest first
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Returns false when the lease was lost
    async fn mark_processed(
        &self,
        id: Uuid,
        lease_token: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns `None` when the lease was lost
    async fn mark_failed(&self, failure: &FailureUpdate) -> Result<Option<FailureOutcome>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError>;

    /// Most recently dead-lettered first
    async fn list_dead(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Return a dead message to normal polling with a fresh retry budget
    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> Result<OutboxMessage, StoreError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError>;
}
