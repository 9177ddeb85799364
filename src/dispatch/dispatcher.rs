//! Outbox Dispatcher
//!
//! Background loop that leases batches of pending outbox messages, delivers
//! them through the subscriber registry and records the outcome. Dispatcher
//! failures are logged, never surfaced to request callers.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::outbox::OutboxMessage;
use crate::store::{ClaimRequest, FailureUpdate, OutboxStore, StoreError};

use super::{BackoffConfig, DeliveryOutcome, SubscriberRegistry};

/// Stored error text is cut to this many characters
const MAX_ERROR_LEN: usize = 4000;

/// Configuration for the outbox dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Recorded as `claimed_by` on leased messages
    pub worker_id: String,
    /// Sleep between polls when the last batch was not full (default: 1 second)
    pub poll_interval: Duration,
    /// Messages leased per cycle (default: 50)
    pub batch_size: usize,
    /// Failures allowed before a message is dead-lettered (default: 5)
    pub max_retries: i32,
    /// Lease length; must exceed the slowest batch (default: 30 seconds)
    pub lease_duration: Duration,
    pub backoff: BackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("dispatcher-{}", std::process::id()),
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_retries: 5,
            lease_duration: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Counts from one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub processed: usize,
    /// Failed and scheduled for another attempt
    pub failed: usize,
    pub dead_lettered: usize,
    /// Outcome discarded because another worker took the lease
    pub lease_lost: usize,
}

/// Delivers outbox messages to subscribers
pub struct OutboxDispatcher<S> {
    store: S,
    registry: Arc<SubscriberRegistry>,
    config: DispatcherConfig,
}

impl<S: OutboxStore + 'static> OutboxDispatcher<S> {
    /// Create a new dispatcher
    pub fn new(store: S, registry: Arc<SubscriberRegistry>, config: DispatcherConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Start the dispatcher in the background
    /// Stops between batches once `shutdown` turns true or its sender is dropped
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the dispatch loop
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch_was_full = match self.run_once().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        tracing::info!(
                            claimed = report.claimed,
                            processed = report.processed,
                            failed = report.failed,
                            dead_lettered = report.dead_lettered,
                            lease_lost = report.lease_lost,
                            "Outbox batch dispatched"
                        );
                    }
                    report.claimed > 0 && report.claimed >= self.config.batch_size
                }
                Err(e) => {
                    tracing::error!(error = %e, "Outbox claim failed");
                    false
                }
            };

            if batch_was_full {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Outbox dispatcher stopped");
    }

    /// Claim one batch and deliver it (for manual trigger or testing)
    pub async fn run_once(&self) -> Result<DispatchReport, StoreError> {
        let request = ClaimRequest {
            worker_id: self.config.worker_id.clone(),
            batch_size: self.config.batch_size.max(1),
            lease: self.config.lease_duration,
            now: Utc::now(),
        };

        let batch = self.store.claim_batch(&request).await?;
        let mut report = DispatchReport {
            claimed: batch.len(),
            ..DispatchReport::default()
        };

        for message in &batch {
            if let Err(e) = self.dispatch(message, &mut report).await {
                // Lease expiry hands the message to the next cycle
                tracing::error!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    error = %e,
                    "Failed to record dispatch outcome"
                );
            }
        }

        Ok(report)
    }

    async fn dispatch(
        &self,
        message: &OutboxMessage,
        report: &mut DispatchReport,
    ) -> Result<(), StoreError> {
        let lease_token = message.lease_token.ok_or_else(|| {
            StoreError::InvalidState(format!("claimed message {} has no lease", message.id))
        })?;

        let outcome = self.registry.deliver(message).await;

        let Some(error) = outcome.error_text() else {
            if outcome == DeliveryOutcome::NoSubscribers {
                tracing::debug!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    "No subscribers, marking processed"
                );
            }

            if self
                .store
                .mark_processed(message.id, lease_token, Utc::now())
                .await?
            {
                report.processed += 1;
            } else {
                self.lease_lost(message, report);
            }
            return Ok(());
        };

        let now = Utc::now();
        let attempt = message.retry_count.saturating_add(1);
        let failure = FailureUpdate {
            id: message.id,
            lease_token,
            error: truncate_error(error),
            max_retries: self.config.max_retries,
            next_attempt_at: self.config.backoff.next_attempt_at(now, attempt),
            now,
        };

        match self.store.mark_failed(&failure).await? {
            Some(result) if result.dead_lettered => {
                report.dead_lettered += 1;
                tracing::error!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    retry_count = result.retry_count,
                    error = %failure.error,
                    "Outbox message dead-lettered"
                );
            }
            Some(result) => {
                report.failed += 1;
                tracing::warn!(
                    message_id = %message.id,
                    message_type = %message.message_type,
                    retry_count = result.retry_count,
                    next_attempt_at = %failure.next_attempt_at,
                    error = %failure.error,
                    "Outbox delivery failed, will retry"
                );
            }
            None => self.lease_lost(message, report),
        }

        Ok(())
    }

    fn lease_lost(&self, message: &OutboxMessage, report: &mut DispatchReport) {
        report.lease_lost += 1;
        tracing::warn!(
            message_id = %message.id,
            message_type = %message.message_type,
            worker_id = %self.config.worker_id,
            "Lease lost before outcome was recorded"
        );
    }
}

fn truncate_error(error: String) -> String {
    match error.char_indices().nth(MAX_ERROR_LEN) {
        Some((cut, _)) => error[..cut].to_string(),
        None => error,
    }
}
