//! Order Aggregate
//!
//! A customer order. Behavior methods validate the transition, mutate state
//! and raise the matching event; nothing is durable until the save
//! coordinator commits it.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, EntityBase, OrderEvent};

use super::Aggregate;

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Shipped,
    Cancelled,
}

/// One product line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Order Aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    base: EntityBase<OrderEvent>,

    /// Customer who placed the order
    customer_id: Uuid,

    lines: Vec<OrderLine>,

    status: OrderStatus,

    cancellation_reason: Option<String>,
}

impl Order {
    /// Place a new order
    pub fn place(customer_id: Uuid) -> Result<Self, DomainError> {
        let order_id = Uuid::new_v4();
        let mut order = Self {
            base: EntityBase::new(order_id),
            customer_id,
            lines: Vec::new(),
            status: OrderStatus::Placed,
            cancellation_reason: None,
        };

        order.base.raise(OrderEvent::Placed {
            order_id,
            customer_id,
            placed_at: order.base.created_at(),
        })?;

        Ok(order)
    }

    /// Add a product line
    pub fn add_line(
        &mut self,
        product_id: Uuid,
        quantity: u32,
        unit_price: Decimal,
    ) -> Result<(), DomainError> {
        self.ensure_status(OrderStatus::Placed, "add lines to")?;

        if quantity == 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        if unit_price <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(unit_price.to_string()));
        }

        self.lines.push(OrderLine {
            product_id,
            quantity,
            unit_price,
        });
        self.base.touch();
        self.base.raise(OrderEvent::LineAdded {
            order_id: self.base.id(),
            product_id,
            quantity,
            unit_price,
        })?;

        Ok(())
    }

    /// Ship the order
    pub fn ship(&mut self) -> Result<(), DomainError> {
        self.ensure_status(OrderStatus::Placed, "ship")?;

        if self.lines.is_empty() {
            return Err(DomainError::BusinessRuleViolation(
                "Cannot ship an order without lines".to_string(),
            ));
        }

        self.status = OrderStatus::Shipped;
        self.base.touch();
        self.base.raise(OrderEvent::Shipped {
            order_id: self.base.id(),
            shipped_at: self.base.updated_at(),
        })?;

        Ok(())
    }

    /// Cancel the order
    pub fn cancel(&mut self, reason: Option<String>) -> Result<(), DomainError> {
        self.ensure_status(OrderStatus::Placed, "cancel")?;

        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = reason.clone();
        self.base.touch();
        self.base.raise(OrderEvent::Cancelled {
            order_id: self.base.id(),
            reason,
            cancelled_at: self.base.updated_at(),
        })?;

        Ok(())
    }

    /// Archive the order (soft delete)
    pub fn archive(&mut self) -> Result<(), DomainError> {
        if self.status == OrderStatus::Placed {
            return Err(DomainError::invalid_state(
                "Only shipped or cancelled orders can be archived",
            ));
        }

        self.base.mark_deleted(Self::ENTITY_TYPE)?;
        self.base.raise(OrderEvent::Archived {
            order_id: self.base.id(),
            archived_at: Utc::now(),
        })?;

        Ok(())
    }

    fn ensure_status(&self, expected: OrderStatus, action: &str) -> Result<(), DomainError> {
        if self.base.is_deleted() {
            return Err(DomainError::AlreadyDeleted {
                entity_type: Self::ENTITY_TYPE,
                id: self.base.id(),
            });
        }
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "Cannot {} an order in status {:?}",
                action, self.status
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }
}

impl Aggregate for Order {
    const ENTITY_TYPE: &'static str = "Order";
    const TABLE: &'static str = "orders";

    type Event = OrderEvent;

    fn entity(&self) -> &EntityBase<OrderEvent> {
        &self.base
    }

    fn entity_mut(&mut self) -> &mut EntityBase<OrderEvent> {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainEvent;
    use rust_decimal_macros::dec;

    fn event_types(order: &Order) -> Vec<&'static str> {
        order
            .entity()
            .pending_events()
            .iter()
            .map(|p| p.event.event_type())
            .collect()
    }

    #[test]
    fn test_place_raises_placed() {
        let customer_id = Uuid::new_v4();
        let order = Order::place(customer_id).unwrap();

        assert_eq!(order.customer_id(), customer_id);
        assert_eq!(order.status(), OrderStatus::Placed);
        assert_eq!(order.version(), 0);
        assert_eq!(event_types(&order), vec!["Placed"]);
    }

    #[test]
    fn test_add_line_and_total() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        order.add_line(Uuid::new_v4(), 2, dec!(19.99)).unwrap();
        order.add_line(Uuid::new_v4(), 1, dec!(5.00)).unwrap();

        assert_eq!(order.total(), dec!(44.98));
        assert_eq!(event_types(&order), vec!["Placed", "LineAdded", "LineAdded"]);
    }

    #[test]
    fn test_add_line_rejects_zero_quantity() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        let result = order.add_line(Uuid::new_v4(), 0, dec!(1.00));

        assert_eq!(result, Err(DomainError::InvalidQuantity(0)));
        assert_eq!(event_types(&order), vec!["Placed"]);
    }

    #[test]
    fn test_cancel_raises_cancelled() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        order.cancel(Some("Changed my mind".to_string())).unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason(), Some("Changed my mind"));
        assert_eq!(event_types(&order), vec!["Placed", "Cancelled"]);
    }

    #[test]
    fn test_cannot_ship_cancelled_order() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        order.cancel(None).unwrap();

        assert!(matches!(order.ship(), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn test_snapshot_round_trip_drops_pending_events() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        order.add_line(Uuid::new_v4(), 3, dec!(12.50)).unwrap();

        let json = serde_json::to_value(&order).unwrap();
        let restored: Order = serde_json::from_value(json).unwrap();

        assert_eq!(restored.id(), order.id());
        assert_eq!(restored.customer_id(), order.customer_id());
        assert_eq!(restored.lines(), order.lines());
        assert_eq!(restored.total(), dec!(37.50));
        assert!(!restored.entity().has_pending_events());
    }

    #[test]
    fn test_ship_requires_lines() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        assert!(matches!(
            order.ship(),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_archive_soft_deletes() {
        let mut order = Order::place(Uuid::new_v4()).unwrap();
        assert!(order.archive().is_err());

        order.cancel(None).unwrap();
        order.archive().unwrap();

        assert!(order.is_deleted());
        assert_eq!(event_types(&order), vec!["Placed", "Cancelled", "Archived"]);
        assert!(matches!(
            order.archive(),
            Err(DomainError::AlreadyDeleted { .. })
        ));
    }
}
