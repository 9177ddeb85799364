//! Product Aggregate
//!
//! Catalog entry. Discontinuing a product soft-deletes it.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, EntityBase, ProductEvent};

use super::Aggregate;

/// Product Aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    base: EntityBase<ProductEvent>,

    /// Stock keeping unit (unique per catalog)
    sku: String,

    name: String,

    price: Decimal,
}

impl Product {
    /// Add a product to the catalog
    pub fn list(sku: String, name: String, price: Decimal) -> Result<Self, DomainError> {
        if sku.trim().is_empty() {
            return Err(DomainError::BusinessRuleViolation(
                "SKU must not be empty".to_string(),
            ));
        }
        if price <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(price.to_string()));
        }

        let product_id = Uuid::new_v4();
        let mut product = Self {
            base: EntityBase::new(product_id),
            sku: sku.clone(),
            name,
            price,
        };
        product.base.raise(ProductEvent::Listed {
            product_id,
            sku,
            price,
        })?;

        Ok(product)
    }

    /// Change the price
    pub fn reprice(&mut self, new_price: Decimal) -> Result<(), DomainError> {
        if self.base.is_deleted() {
            return Err(DomainError::AlreadyDeleted {
                entity_type: Self::ENTITY_TYPE,
                id: self.base.id(),
            });
        }
        if new_price <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(new_price.to_string()));
        }
        if new_price == self.price {
            return Ok(());
        }

        let old_price = self.price;
        self.price = new_price;
        self.base.touch();
        self.base.raise(ProductEvent::Repriced {
            product_id: self.base.id(),
            old_price,
            new_price,
        })?;

        Ok(())
    }

    /// Remove from the catalog (soft delete)
    pub fn discontinue(&mut self) -> Result<(), DomainError> {
        self.base.mark_deleted(Self::ENTITY_TYPE)?;
        self.base.raise(ProductEvent::Discontinued {
            product_id: self.base.id(),
            discontinued_at: Utc::now(),
        })?;

        Ok(())
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Decimal {
        self.price
    }
}

impl Aggregate for Product {
    const ENTITY_TYPE: &'static str = "Product";
    const TABLE: &'static str = "products";

    type Event = ProductEvent;

    fn entity(&self) -> &EntityBase<ProductEvent> {
        &self.base
    }

    fn entity_mut(&mut self) -> &mut EntityBase<ProductEvent> {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_list_product() {
        let product = Product::list("SKU-1".to_string(), "Mug".to_string(), dec!(9.50)).unwrap();

        assert_eq!(product.sku(), "SKU-1");
        assert_eq!(product.price(), dec!(9.50));
        assert_eq!(product.entity().pending_events().len(), 1);
    }

    #[test]
    fn test_list_rejects_non_positive_price() {
        let result = Product::list("SKU-1".to_string(), "Mug".to_string(), dec!(0));
        assert!(matches!(result, Err(DomainError::InvalidPrice(_))));
    }

    #[test]
    fn test_reprice_same_price_raises_nothing() {
        let mut product =
            Product::list("SKU-1".to_string(), "Mug".to_string(), dec!(9.50)).unwrap();
        product.reprice(dec!(9.50)).unwrap();
        assert_eq!(product.entity().pending_events().len(), 1);

        product.reprice(dec!(7.25)).unwrap();
        assert_eq!(product.entity().pending_events().len(), 2);
        assert_eq!(product.price(), dec!(7.25));
    }

    #[test]
    fn test_discontinued_product_cannot_be_repriced() {
        let mut product =
            Product::list("SKU-1".to_string(), "Mug".to_string(), dec!(9.50)).unwrap();
        product.discontinue().unwrap();

        assert!(product.is_deleted());
        assert!(matches!(
            product.reprice(dec!(1.00)),
            Err(DomainError::AlreadyDeleted { .. })
        ));
    }
}
