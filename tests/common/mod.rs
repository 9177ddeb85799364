//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use commerce_outbox::dispatch::{
    BackoffConfig, Delivery, DispatcherConfig, EventHandler, SubscriberError,
};
use commerce_outbox::domain::OrderEvent;

/// Dispatcher settings for tests: retries are immediately claimable
pub fn test_dispatcher_config(max_retries: i32) -> DispatcherConfig {
    DispatcherConfig {
        worker_id: "test-worker".to_string(),
        poll_interval: Duration::from_millis(10),
        batch_size: 50,
        max_retries,
        lease_duration: Duration::from_secs(30),
        backoff: BackoffConfig::immediate(),
    }
}

/// Records every delivery it sees
#[derive(Default)]
pub struct RecordingSubscriber {
    deliveries: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (message id, message type) in delivery order
    pub fn deliveries(&self) -> Vec<(Uuid, String)> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|(_, t)| t).collect()
    }
}

#[async_trait]
impl EventHandler<OrderEvent> for RecordingSubscriber {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, delivery: &Delivery<OrderEvent>) -> Result<(), SubscriberError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((delivery.message_id, delivery.message_type.clone()));
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds
pub struct FlakySubscriber {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakySubscriber {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler<OrderEvent> for FlakySubscriber {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _delivery: &Delivery<OrderEvent>) -> Result<(), SubscriberError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SubscriberError::Unavailable(format!("attempt {} failed", call + 1)));
        }
        Ok(())
    }
}

/// Fails until switched healthy
pub struct SwitchableSubscriber {
    healthy: AtomicBool,
}

impl SwitchableSubscriber {
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(false),
        })
    }

    pub fn heal(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventHandler<OrderEvent> for SwitchableSubscriber {
    fn name(&self) -> &str {
        "switchable"
    }

    async fn handle(&self, _delivery: &Delivery<OrderEvent>) -> Result<(), SubscriberError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SubscriberError::Rejected("downstream refused".to_string()))
        }
    }
}

/// Setup test database - truncate outbox and entity tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE outbox_messages, orders, products")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
