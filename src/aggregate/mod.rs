//! Aggregate module
//!
//! Persisted aggregates that raise domain events.

pub mod order;
pub mod product;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{DomainEvent, EntityBase};
use crate::filters::QueryFilterBuilder;

pub use order::{Order, OrderLine, OrderStatus};
pub use product::Product;

/// Aggregate trait that all event-bearing entities implement
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type name (for logs and errors)
    const ENTITY_TYPE: &'static str;

    /// Table holding this aggregate's rows
    const TABLE: &'static str;

    /// The type of events this aggregate raises
    type Event: DomainEvent;

    /// Shared entity state
    fn entity(&self) -> &EntityBase<Self::Event>;

    /// Mutable entity state, for the aggregate's own behavior methods
    fn entity_mut(&mut self) -> &mut EntityBase<Self::Event>;

    fn id(&self) -> Uuid {
        self.entity().id()
    }

    fn version(&self) -> i64 {
        self.entity().version()
    }

    fn is_deleted(&self) -> bool {
        self.entity().is_deleted()
    }
}

/// Register every aggregate of this crate with the query filter builder
pub fn register_all(builder: QueryFilterBuilder) -> QueryFilterBuilder {
    builder.register::<Order>().register::<Product>()
}
