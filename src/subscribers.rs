//! Sample subscribers
//!
//! Log-only subscribers for the sample domain, wired up by the binary so a
//! fresh deployment shows messages flowing end to end.

use async_trait::async_trait;

use crate::dispatch::{Delivery, EventHandler, RegistryError, SubscriberError, SubscriberRegistry};
use crate::domain::{DomainEvent, OrderEvent, ProductEvent};

/// Logs every delivered event at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSubscriber;

#[async_trait]
impl EventHandler<OrderEvent> for LoggingSubscriber {
    fn name(&self) -> &str {
        "order-log"
    }

    async fn handle(&self, delivery: &Delivery<OrderEvent>) -> Result<(), SubscriberError> {
        tracing::info!(
            message_id = %delivery.message_id,
            message_type = %delivery.message_type,
            order_id = %delivery.event.order_id(),
            retry_count = delivery.retry_count,
            "Order event delivered"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ProductEvent> for LoggingSubscriber {
    fn name(&self) -> &str {
        "catalog-log"
    }

    async fn handle(&self, delivery: &Delivery<ProductEvent>) -> Result<(), SubscriberError> {
        tracing::info!(
            message_id = %delivery.message_id,
            message_type = %delivery.message_type,
            retry_count = delivery.retry_count,
            "Catalog event delivered"
        );
        Ok(())
    }
}

/// Subscribe one handler to every discriminator of `E`
pub fn subscribe_all<E, H>(registry: &mut SubscriberRegistry, handler: H) -> Result<(), RegistryError>
where
    E: DomainEvent,
    H: EventHandler<E> + Clone,
{
    for event_type in E::EVENT_TYPES {
        registry.subscribe::<E, H>(event_type, handler.clone())?;
    }
    Ok(())
}

/// Registry with the sample logging subscribers
pub fn sample_registry() -> Result<SubscriberRegistry, RegistryError> {
    let mut registry = SubscriberRegistry::new();
    subscribe_all::<OrderEvent, _>(&mut registry, LoggingSubscriber)?;
    subscribe_all::<ProductEvent, _>(&mut registry, LoggingSubscriber)?;
    Ok(registry)
}
