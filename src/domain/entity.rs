//! Event-bearing entity base
//!
//! Every persisted aggregate embeds an `EntityBase`. It carries the row
//! metadata (id, timestamps, soft-delete flag, version) and the transient
//! list of events raised during the current unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DomainError, DomainEvent, PendingEvent};

/// Proof that a unit of work was committed.
///
/// Only the save coordinator can construct one, so only the save coordinator
/// can drain pending events.
#[derive(Debug, Clone, Copy)]
pub struct CommitReceipt {
    committed_at: DateTime<Utc>,
}

impl CommitReceipt {
    pub(crate) fn new(committed_at: DateTime<Utc>) -> Self {
        Self { committed_at }
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }
}

/// Shared state of every event-bearing entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityBase<E> {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_deleted: bool,

    /// Version of the stored row this instance was loaded from (0 = never saved)
    version: i64,

    /// Never part of the entity's own row
    #[serde(skip, default = "Vec::new")]
    pending_events: Vec<PendingEvent<E>>,
}

impl<E: DomainEvent> EntityBase<E> {
    /// Create the base for a brand new entity
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            version: 0,
            pending_events: Vec::new(),
        }
    }

    /// Record an event raised by the owning aggregate's behavior.
    ///
    /// Only the aggregate's own methods raise events. Returns the id the
    /// resulting outbox message will carry.
    ///
    /// ```compile_fail
    /// use commerce_outbox::aggregate::{Aggregate, Order};
    /// use commerce_outbox::domain::OrderEvent;
    ///
    /// let mut order = Order::place(uuid::Uuid::new_v4()).unwrap();
    /// let order_id = order.id();
    /// order.entity_mut().raise(OrderEvent::Shipped {
    ///     order_id,
    ///     shipped_at: chrono::Utc::now(),
    /// });
    /// ```
    pub(crate) fn raise(&mut self, event: E) -> Result<Uuid, DomainError> {
        if event.event_type().trim().is_empty() {
            return Err(DomainError::InvalidEvent(
                "event type discriminator must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        self.pending_events.push(PendingEvent {
            id,
            occurred_at: Utc::now(),
            event,
        });
        Ok(id)
    }

    /// Bump `updated_at` after a state change
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Soft delete: the row stays, default queries stop returning it
    ///
    /// ```compile_fail
    /// use commerce_outbox::aggregate::{Aggregate, Order};
    ///
    /// let mut order = Order::place(uuid::Uuid::new_v4()).unwrap();
    /// order.entity_mut().mark_deleted("Order");
    /// ```
    pub(crate) fn mark_deleted(&mut self, entity_type: &'static str) -> Result<(), DomainError> {
        if self.is_deleted {
            return Err(DomainError::AlreadyDeleted {
                entity_type,
                id: self.id,
            });
        }
        self.is_deleted = true;
        self.touch();
        Ok(())
    }

    /// Drain pending events once the unit of work is durable
    pub(crate) fn complete_save(&mut self, _receipt: &CommitReceipt) -> usize {
        let drained = self.pending_events.len();
        self.pending_events.clear();
        self.version += 1;
        drained
    }

    /// Overwrite row metadata with the authoritative column values
    pub(crate) fn restore(&mut self, is_deleted: bool, version: i64, updated_at: DateTime<Utc>) {
        self.is_deleted = is_deleted;
        self.version = version;
        self.updated_at = updated_at;
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn pending_events(&self) -> &[PendingEvent<E>] {
        &self.pending_events
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending_events.is_empty()
    }
}
