//! Domain Events
//!
//! Event definitions raised by aggregates.
//! Events are immutable facts that have happened in the system; each one
//! becomes an outbox message when the unit of work that raised it commits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event an aggregate can raise.
///
/// Implementors are internally tagged (`#[serde(tag = "type")]`) so the
/// serialized content carries the same discriminator as `event_type()`.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Every discriminator this type can produce
    const EVENT_TYPES: &'static [&'static str];

    /// Discriminator stored in the outbox `type` column
    fn event_type(&self) -> &'static str;
}

/// An event raised during the current unit of work and not yet durable
#[derive(Debug, Clone)]
pub struct PendingEvent<E> {
    /// Becomes the outbox message id; subscribers dedupe on it
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: E,
}

/// Order-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    /// Order was placed
    Placed {
        order_id: Uuid,
        customer_id: Uuid,
        placed_at: DateTime<Utc>,
    },

    /// A product line was added to the order
    LineAdded {
        order_id: Uuid,
        product_id: Uuid,
        quantity: u32,
        unit_price: Decimal,
    },

    /// Order left the warehouse
    Shipped {
        order_id: Uuid,
        shipped_at: DateTime<Utc>,
    },

    /// Order was cancelled
    Cancelled {
        order_id: Uuid,
        reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    },

    /// Order was archived (soft delete)
    Archived {
        order_id: Uuid,
        archived_at: DateTime<Utc>,
    },
}

impl OrderEvent {
    /// Get the order ID this event relates to
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Placed { order_id, .. } => *order_id,
            OrderEvent::LineAdded { order_id, .. } => *order_id,
            OrderEvent::Shipped { order_id, .. } => *order_id,
            OrderEvent::Cancelled { order_id, .. } => *order_id,
            OrderEvent::Archived { order_id, .. } => *order_id,
        }
    }
}

impl DomainEvent for OrderEvent {
    const EVENT_TYPES: &'static [&'static str] =
        &["Placed", "LineAdded", "Shipped", "Cancelled", "Archived"];

    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed { .. } => "Placed",
            OrderEvent::LineAdded { .. } => "LineAdded",
            OrderEvent::Shipped { .. } => "Shipped",
            OrderEvent::Cancelled { .. } => "Cancelled",
            OrderEvent::Archived { .. } => "Archived",
        }
    }
}

/// Catalog events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProductEvent {
    /// Product was added to the catalog
    Listed {
        product_id: Uuid,
        sku: String,
        price: Decimal,
    },

    /// Product price changed
    Repriced {
        product_id: Uuid,
        old_price: Decimal,
        new_price: Decimal,
    },

    /// Product was removed from the catalog (soft delete)
    Discontinued {
        product_id: Uuid,
        discontinued_at: DateTime<Utc>,
    },
}

impl DomainEvent for ProductEvent {
    const EVENT_TYPES: &'static [&'static str] = &["Listed", "Repriced", "Discontinued"];

    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::Listed { .. } => "Listed",
            ProductEvent::Repriced { .. } => "Repriced",
            ProductEvent::Discontinued { .. } => "Discontinued",
        }
    }
}
