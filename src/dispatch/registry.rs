//! Subscriber registry
//!
//! Maps an outbox message's type discriminator to the subscribers for that
//! event. Each discriminator is bound to one concrete event type; content is
//! decoded once per message and fanned out to handlers in registration
//! order.
//!
//! Subscribers receive every message at least once and must tolerate
//! duplicates, deduping on `Delivery::message_id` where it matters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::DomainEvent;
use crate::outbox::OutboxMessage;

/// One event handed to a subscriber
#[derive(Debug, Clone)]
pub struct Delivery<E> {
    /// Outbox message id, equal to the id assigned when the event was raised
    pub message_id: Uuid,
    pub message_type: String,
    pub occurred_on_utc: DateTime<Utc>,

    /// Failed attempts so far
    pub retry_count: i32,
    pub event: E,
}

/// Errors returned by subscribers
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// The subscriber refused the event
    #[error("Rejected: {0}")]
    Rejected(String),

    /// A downstream dependency is unavailable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Handles one event type
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    /// Name used in logs and stored errors
    fn name(&self) -> &str;

    async fn handle(&self, delivery: &Delivery<E>) -> Result<(), SubscriberError>;
}

#[async_trait]
impl<E: DomainEvent, H: EventHandler<E>> EventHandler<E> for Arc<H> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn handle(&self, delivery: &Delivery<E>) -> Result<(), SubscriberError> {
        self.as_ref().handle(delivery).await
    }
}

/// Errors raised while registering subscribers
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Event type discriminator must not be empty")]
    EmptyEventType,

    /// The discriminator is already bound to a different event type
    #[error("Event type {event_type} is bound to {registered}, cannot subscribe {requested}")]
    EventTypeMismatch {
        event_type: String,
        registered: &'static str,
        requested: &'static str,
    },
}

/// A subscriber that failed for one message
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberFailure {
    pub subscriber: String,
    pub error: String,
}

/// Result of delivering one message
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Every subscriber succeeded
    Delivered(usize),

    /// Nothing is subscribed to the discriminator
    NoSubscribers,

    /// Content did not decode into the bound event type
    DecodeFailed(String),

    SubscribersFailed(Vec<SubscriberFailure>),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_) | DeliveryOutcome::NoSubscribers)
    }

    /// Error text to store on the message, if the delivery failed
    pub fn error_text(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Delivered(_) | DeliveryOutcome::NoSubscribers => None,
            DeliveryOutcome::DecodeFailed(e) => Some(format!("decode failed: {}", e)),
            DeliveryOutcome::SubscribersFailed(failures) => Some(
                failures
                    .iter()
                    .map(|f| format!("{}: {}", f.subscriber, f.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }
}

#[async_trait]
trait Route: Send + Sync {
    fn event_type_name(&self) -> &'static str;

    fn handler_count(&self) -> usize;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    async fn deliver(&self, message: &OutboxMessage) -> DeliveryOutcome;
}

struct TypedRoute<E: DomainEvent> {
    handlers: Vec<Arc<dyn EventHandler<E>>>,
}

#[async_trait]
impl<E: DomainEvent> Route for TypedRoute<E> {
    fn event_type_name(&self) -> &'static str {
        type_name::<E>()
    }

    fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    async fn deliver(&self, message: &OutboxMessage) -> DeliveryOutcome {
        let event: E = match serde_json::from_value(message.content.clone()) {
            Ok(event) => event,
            Err(e) => return DeliveryOutcome::DecodeFailed(e.to_string()),
        };

        if event.event_type() != message.message_type {
            return DeliveryOutcome::DecodeFailed(format!(
                "content is {}, message type is {}",
                event.event_type(),
                message.message_type
            ));
        }

        let delivery = Delivery {
            message_id: message.id,
            message_type: message.message_type.clone(),
            occurred_on_utc: message.occurred_on_utc,
            retry_count: message.retry_count,
            event,
        };

        let mut failures = Vec::new();

        for handler in &self.handlers {
            // A panicking subscriber fails on its own without taking the others down
            let task_handler = Arc::clone(handler);
            let task_delivery = delivery.clone();
            let result = tokio::spawn(async move { task_handler.handle(&task_delivery).await })
                .await
                .unwrap_or_else(|join_error| {
                    Err(SubscriberError::Rejected(format!("subscriber panicked: {}", join_error)))
                });

            if let Err(e) = result {
                tracing::warn!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    retry_count = message.retry_count,
                    subscriber = handler.name(),
                    error = %e,
                    "Subscriber failed"
                );
                failures.push(SubscriberFailure {
                    subscriber: handler.name().to_string(),
                    error: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            DeliveryOutcome::Delivered(self.handlers.len())
        } else {
            DeliveryOutcome::SubscribersFailed(failures)
        }
    }
}

/// Routes outbox messages to subscribers by type discriminator
#[derive(Default)]
pub struct SubscriberRegistry {
    routes: HashMap<String, Box<dyn Route>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one discriminator of event type `E`
    pub fn subscribe<E, H>(&mut self, event_type: &str, handler: H) -> Result<(), RegistryError>
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        if event_type.trim().is_empty() {
            return Err(RegistryError::EmptyEventType);
        }

        let route = self
            .routes
            .entry(event_type.to_string())
            .or_insert_with(|| Box::new(TypedRoute::<E> { handlers: Vec::new() }));

        let registered = route.event_type_name();
        let typed = match route.as_any_mut().downcast_mut::<TypedRoute<E>>() {
            Some(typed) => typed,
            None => {
                return Err(RegistryError::EventTypeMismatch {
                    event_type: event_type.to_string(),
                    registered,
                    requested: type_name::<E>(),
                })
            }
        };

        tracing::debug!(event_type, subscriber = handler.name(), "Subscriber registered");
        typed.handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Deliver one message to every subscriber of its discriminator
    pub async fn deliver(&self, message: &OutboxMessage) -> DeliveryOutcome {
        match self.routes.get(&message.message_type) {
            Some(route) => route.deliver(message).await,
            None => DeliveryOutcome::NoSubscribers,
        }
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.routes.get(event_type).map_or(0, |r| r.handler_count())
    }

    /// Discriminators with at least one subscriber
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
