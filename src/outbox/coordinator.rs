//! Save Coordinator
//!
//! Commits business-state changes and the outbox messages for every event
//! they raised in a single store transaction. Pending events are drained
//! only after the commit succeeds; on failure nothing is visible and the
//! caller can retry the whole unit of work.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{CommitReceipt, DomainEvent};
use crate::store::{EntityRow, EntityWrite, StoreError, UnitOfWork, UnitOfWorkStore};

use super::{NewOutboxMessage, OutboxMessage};

/// Entity staged for a unit of work
#[derive(Debug, Clone)]
pub struct StagedEntity {
    pub write: EntityWrite,

    /// In raise order
    pub messages: Vec<NewOutboxMessage>,
}

/// A tracked entity the coordinator can flush.
///
/// Implemented for every [`Aggregate`]; lets one save span several
/// aggregate types.
pub trait Tracked: Send {
    fn entity_type(&self) -> &'static str;

    fn entity_id(&self) -> Uuid;

    fn pending_event_count(&self) -> usize;

    /// Serialize the row and one outbox message per pending event
    fn stage(&self) -> Result<StagedEntity, serde_json::Error>;

    /// Drain pending events after a successful commit
    fn complete_save(&mut self, receipt: &CommitReceipt);
}

impl<A: Aggregate> Tracked for A {
    fn entity_type(&self) -> &'static str {
        A::ENTITY_TYPE
    }

    fn entity_id(&self) -> Uuid {
        self.id()
    }

    fn pending_event_count(&self) -> usize {
        self.entity().pending_events().len()
    }

    fn stage(&self) -> Result<StagedEntity, serde_json::Error> {
        let base = self.entity();

        let row = EntityRow {
            id: base.id(),
            created_at: base.created_at(),
            updated_at: base.updated_at(),
            is_deleted: base.is_deleted(),
            version: base.version() + 1,
            data: serde_json::to_value(self)?,
        };

        let messages = base
            .pending_events()
            .iter()
            .map(|pending| {
                Ok(NewOutboxMessage {
                    id: pending.id,
                    message_type: pending.event.event_type().to_string(),
                    content: serde_json::to_value(&pending.event)?,
                    occurred_on_utc: pending.occurred_at,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        Ok(StagedEntity {
            write: EntityWrite {
                entity_type: A::ENTITY_TYPE,
                table: A::TABLE,
                expected_version: base.version(),
                row,
            },
            messages,
        })
    }

    fn complete_save(&mut self, receipt: &CommitReceipt) {
        self.entity_mut().complete_save(receipt);
    }
}

/// Errors surfaced synchronously to the caller of `save`
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// An entity or event could not be serialized; nothing was written
    #[error("Failed to serialize {entity_type} {id}: {source}")]
    Serialization {
        entity_type: &'static str,
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    /// The transaction failed and was rolled back
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SaveError {
    /// Check if retrying the whole unit of work may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SaveError::Serialization { .. } => false,
            SaveError::Store(e) => e.is_retryable(),
        }
    }
}

/// What a successful save made durable
#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    /// Outbox messages inserted by this save, in raise order
    pub records: Vec<OutboxMessage>,
    pub entities_written: usize,
    pub committed_at: DateTime<Utc>,
}

/// Coordinates atomic saves of entities and their events
#[derive(Debug, Clone)]
pub struct SaveCoordinator<S> {
    store: S,
}

impl<S: UnitOfWorkStore> SaveCoordinator<S> {
    /// Create a new SaveCoordinator over a store
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Save a set of tracked, mutated entities in one transaction
    pub async fn save(&self, entities: &mut [&mut dyn Tracked]) -> Result<SaveOutcome, SaveError> {
        if entities.is_empty() {
            return Ok(SaveOutcome::default());
        }

        let mut unit = UnitOfWork::default();
        let mut participants = 0usize;

        for entity in entities.iter() {
            let staged = entity
                .stage()
                .map_err(|source| SaveError::Serialization {
                    entity_type: entity.entity_type(),
                    id: entity.entity_id(),
                    source,
                })?;

            if !staged.messages.is_empty() {
                participants += 1;
            }
            unit.writes.push(staged.write);
            unit.messages.extend(staged.messages);
        }

        let entities_written = unit.writes.len();
        let message_count = unit.messages.len();

        let records = match self.store.commit(unit).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    entities = entities_written,
                    messages = message_count,
                    "Unit of work rolled back, pending events kept"
                );
                return Err(SaveError::Store(e));
            }
        };

        let receipt = CommitReceipt::new(Utc::now());
        for entity in entities.iter_mut() {
            entity.complete_save(&receipt);
        }

        tracing::debug!(
            entities = entities_written,
            event_sources = participants,
            messages = records.len(),
            "Unit of work committed"
        );

        Ok(SaveOutcome {
            records,
            entities_written,
            committed_at: receipt.committed_at(),
        })
    }

    /// Save a single aggregate
    pub async fn save_one<A: Aggregate>(&self, aggregate: &mut A) -> Result<SaveOutcome, SaveError> {
        self.save(&mut [aggregate as &mut dyn Tracked]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Order, Product};
    use crate::domain::EntityBase;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use serde::{Deserialize, Serialize, Serializer};

    /// Event whose payload can never be serialized
    #[derive(Debug, Clone, Deserialize)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("payload cannot be encoded"))
        }
    }

    impl DomainEvent for Unserializable {
        const EVENT_TYPES: &'static [&'static str] = &["Unserializable"];

        fn event_type(&self) -> &'static str {
            "Unserializable"
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Gadget {
        base: EntityBase<Unserializable>,
    }

    impl Aggregate for Gadget {
        const ENTITY_TYPE: &'static str = "Gadget";
        const TABLE: &'static str = "gadgets";

        type Event = Unserializable;

        fn entity(&self) -> &EntityBase<Unserializable> {
            &self.base
        }

        fn entity_mut(&mut self) -> &mut EntityBase<Unserializable> {
            &mut self.base
        }
    }

    #[test]
    fn test_stage_serializes_row_and_events_in_order() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        order.cancel(None).unwrap();

        let staged = order.stage().unwrap();

        assert_eq!(staged.write.table, "orders");
        assert_eq!(staged.write.expected_version, 0);
        assert_eq!(staged.write.row.version, 1);
        assert!(staged.write.row.data.get("base").is_some());

        let types: Vec<_> = staged.messages.iter().map(|m| m.message_type.as_str()).collect();
        assert_eq!(types, vec!["Placed", "Cancelled"]);
        assert_eq!(staged.messages[1].content["type"], "Cancelled");
        assert_eq!(staged.messages[0].id, order.entity().pending_events()[0].id);
    }

    #[tokio::test]
    async fn test_save_returns_durable_records_and_drains_events() {
        let store = InMemoryStore::new();
        let coordinator = SaveCoordinator::new(store.clone());

        let mut order = Order::place(Uuid::new_v4()).unwrap();
        let mut product =
            Product::list("SKU-9".to_string(), "Lamp".to_string(), dec!(30.00)).unwrap();

        let mut batch: Vec<&mut dyn Tracked> = Vec::new();
        batch.push(&mut order);
        batch.push(&mut product);

        let outcome = coordinator.save(&mut batch).await.unwrap();

        assert_eq!(outcome.entities_written, 2);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].message_type, "Placed");
        assert_eq!(outcome.records[1].message_type, "Listed");
        assert_eq!(order.pending_event_count(), 0);
        assert_eq!(product.pending_event_count(), 0);
        assert_eq!(order.version(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_pending_events() {
        let store = InMemoryStore::new();
        let coordinator = SaveCoordinator::new(store.clone());
        let mut order = Order::place(Uuid::new_v4()).unwrap();

        store.fail_next_commit();
        let err = coordinator.save_one(&mut order).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(order.pending_event_count(), 1);
        assert_eq!(order.version(), 0);
        assert!(store.messages().is_empty());

        let outcome = coordinator.save_one(&mut order).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(order.pending_event_count(), 0);
    }

    #[tokio::test]
    async fn test_save_nothing_is_a_no_op() {
        let coordinator = SaveCoordinator::new(InMemoryStore::new());
        let outcome = coordinator.save(&mut []).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.entities_written, 0);
    }

    #[tokio::test]
    async fn test_unserializable_event_fails_whole_unit() {
        let store = InMemoryStore::new();
        let coordinator = SaveCoordinator::new(store.clone());

        let mut order = Order::place(Uuid::new_v4()).unwrap();
        let mut gadget = Gadget {
            base: EntityBase::new(Uuid::new_v4()),
        };
        gadget.base.raise(Unserializable).unwrap();

        let mut batch: Vec<&mut dyn Tracked> = Vec::new();
        batch.push(&mut order);
        batch.push(&mut gadget);
        let err = coordinator.save(&mut batch).await.unwrap_err();

        assert!(matches!(
            err,
            SaveError::Serialization {
                entity_type: "Gadget",
                ..
            }
        ));
        assert!(!err.is_retryable());

        assert!(store.messages().is_empty());
        assert!(store.rows("orders").is_empty());
        assert!(store.rows("gadgets").is_empty());
        assert_eq!(order.pending_event_count(), 1);
        assert_eq!(gadget.pending_event_count(), 1);
        assert_eq!(gadget.version(), 0);
    }
}
