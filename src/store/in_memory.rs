//! In-memory store
//!
//! Applies the same contracts as `PgStore` against process memory. Every
//! operation takes the state lock once, so a unit of work is validated and
//! applied as a whole or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::outbox::{NewOutboxMessage, OutboxMessage, OutboxStats, OutboxStatus};

use super::{
    ClaimRequest, EntityRow, EntityStore, FailureOutcome, FailureUpdate, OutboxStore, RowScope,
    StoreError, UnitOfWork, UnitOfWorkStore,
};

#[derive(Debug, Default)]
struct State {
    tables: HashMap<&'static str, HashMap<Uuid, EntityRow>>,
    messages: HashMap<Uuid, OutboxMessage>,
    next_sequence: i64,
}

impl State {
    fn push_message(&mut self, message: NewOutboxMessage) -> OutboxMessage {
        self.next_sequence += 1;
        let stored = message.into_message(self.next_sequence);
        self.messages.insert(stored.id, stored.clone());
        stored
    }

    fn validate(&self, unit: &UnitOfWork) -> Result<(), StoreError> {
        for write in &unit.writes {
            let current = self
                .tables
                .get(write.table)
                .and_then(|rows| rows.get(&write.row.id))
                .map(|row| row.version);

            let matches = match current {
                None => write.expected_version == 0,
                Some(version) => version == write.expected_version,
            };

            if !matches {
                return Err(StoreError::ConcurrencyConflict {
                    entity_type: write.entity_type,
                    id: write.row.id,
                    expected: write.expected_version,
                });
            }
        }

        for message in &unit.messages {
            if self.messages.contains_key(&message.id) {
                return Err(StoreError::InvalidState(format!(
                    "outbox message {} already exists",
                    message.id
                )));
            }
        }

        Ok(())
    }
}

/// Store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail as if the database went away
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a message outside any unit of work
    pub fn enqueue(&self, message: NewOutboxMessage) -> OutboxMessage {
        self.write().push_message(message)
    }

    /// All outbox messages in insertion order
    pub fn messages(&self) -> Vec<OutboxMessage> {
        let mut messages: Vec<_> = self.read().messages.values().cloned().collect();
        messages.sort_by_key(|m| m.sequence);
        messages
    }

    pub fn message(&self, id: Uuid) -> Option<OutboxMessage> {
        self.read().messages.get(&id).cloned()
    }

    /// Raw rows of one table, deleted ones included
    pub fn rows(&self, table: &str) -> Vec<EntityRow> {
        let mut rows: Vec<_> = self
            .read()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.created_at, r.id));
        rows
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UnitOfWorkStore for InMemoryStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<Vec<OutboxMessage>, StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut state = self.write();
        state.validate(&unit)?;

        for write in unit.writes {
            state
                .tables
                .entry(write.table)
                .or_default()
                .insert(write.row.id, write.row);
        }

        let records = unit
            .messages
            .into_iter()
            .map(|message| state.push_message(message))
            .collect();

        Ok(records)
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn fetch_row(
        &self,
        table: &'static str,
        id: Uuid,
        scope: RowScope<'_>,
    ) -> Result<Option<EntityRow>, StoreError> {
        let state = self.read();
        let row = state
            .tables
            .get(table)
            .and_then(|rows| rows.get(&id))
            .filter(|row| scope.admits(row))
            .cloned();
        Ok(row)
    }

    async fn fetch_rows(
        &self,
        table: &'static str,
        scope: RowScope<'_>,
    ) -> Result<Vec<EntityRow>, StoreError> {
        let mut rows: Vec<_> = self
            .rows(table)
            .into_iter()
            .filter(|row| scope.admits(row))
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxMessage>, StoreError> {
        let locked_until = request.lease_expires_at()?;
        let mut state = self.write();

        let mut candidates: Vec<_> = state
            .messages
            .values()
            .filter(|m| m.is_claimable_at(request.now))
            .map(|m| (m.occurred_on_utc, m.sequence, m.id))
            .collect();
        candidates.sort();
        candidates.truncate(request.batch_size);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            if let Some(message) = state.messages.get_mut(&id) {
                message.lease_token = Some(Uuid::new_v4());
                message.locked_until = Some(locked_until);
                message.claimed_by = Some(request.worker_id.clone());
                claimed.push(message.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        lease_token: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.write();
        let Some(message) = state.messages.get_mut(&id) else {
            return Ok(false);
        };

        if message.lease_token != Some(lease_token) || message.processed_on_utc.is_some() {
            return Ok(false);
        }

        message.processed_on_utc = Some(processed_at);
        message.error = None;
        message.lease_token = None;
        message.locked_until = None;
        Ok(true)
    }

    async fn mark_failed(&self, failure: &FailureUpdate) -> Result<Option<FailureOutcome>, StoreError> {
        let mut state = self.write();
        let Some(message) = state.messages.get_mut(&failure.id) else {
            return Ok(None);
        };

        if message.lease_token != Some(failure.lease_token) || message.processed_on_utc.is_some() {
            return Ok(None);
        }

        message.retry_count += 1;
        message.error = Some(failure.error.clone());
        message.lease_token = None;
        message.locked_until = None;
        message.next_attempt_at = failure.next_attempt_at;

        let dead_lettered = message.retry_count > failure.max_retries;
        if dead_lettered {
            message.dead_lettered_on_utc = Some(failure.now);
        }

        Ok(Some(FailureOutcome {
            retry_count: message.retry_count,
            dead_lettered,
        }))
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError> {
        Ok(self.message(id))
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut dead: Vec<_> = self
            .read()
            .messages
            .values()
            .filter(|m| m.processed_on_utc.is_none() && m.dead_lettered_on_utc.is_some())
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.dead_lettered_on_utc.cmp(&a.dead_lettered_on_utc));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> Result<OutboxMessage, StoreError> {
        let mut state = self.write();
        let message = state.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let status = message.status_at(now);
        if status != OutboxStatus::Dead {
            return Err(StoreError::InvalidState(format!(
                "message {} is {}, only dead messages can be replayed",
                id, status
            )));
        }

        message.retry_count = 0;
        message.dead_lettered_on_utc = None;
        message.next_attempt_at = now;
        message.lease_token = None;
        message.locked_until = None;
        Ok(message.clone())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError> {
        let state = self.read();
        let mut stats = OutboxStats::default();

        for message in state.messages.values() {
            match message.status_at(now) {
                OutboxStatus::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending_at = Some(match stats.oldest_pending_at {
                        Some(oldest) => oldest.min(message.occurred_on_utc),
                        None => message.occurred_on_utc,
                    });
                }
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Processed => stats.processed += 1,
                OutboxStatus::Dead => stats.dead += 1,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn new_message(message_type: &str, occurred_on_utc: DateTime<Utc>) -> NewOutboxMessage {
        NewOutboxMessage {
            id: Uuid::new_v4(),
            message_type: message_type.to_string(),
            content: serde_json::json!({ "type": message_type }),
            occurred_on_utc,
        }
    }

    fn claim(now: DateTime<Utc>, batch_size: usize) -> ClaimRequest {
        ClaimRequest {
            worker_id: "worker-1".to_string(),
            batch_size,
            lease: StdDuration::from_secs(30),
            now,
        }
    }

    fn failure(message: &OutboxMessage, max_retries: i32, now: DateTime<Utc>) -> FailureUpdate {
        FailureUpdate {
            id: message.id,
            lease_token: message.lease_token.unwrap(),
            error: "boom".to_string(),
            max_retries,
            next_attempt_at: now,
            now,
        }
    }

    #[tokio::test]
    async fn test_claim_orders_by_occurrence_then_sequence() {
        let store = InMemoryStore::new();
        let t0 = Utc::now() - Duration::seconds(10);

        let late = store.enqueue(new_message("Late", t0 + Duration::seconds(5)));
        let first = store.enqueue(new_message("First", t0));
        let second = store.enqueue(new_message("Second", t0));

        let claimed = store.claim_batch(&claim(Utc::now(), 10)).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|m| m.id).collect();

        assert_eq!(ids, vec![first.id, second.id, late.id]);
        assert!(claimed.iter().all(|m| m.claimed_by.as_deref() == Some("worker-1")));
    }

    #[tokio::test]
    async fn test_claimed_messages_are_not_claimed_twice() {
        let store = InMemoryStore::new();
        store.enqueue(new_message("Placed", Utc::now() - Duration::seconds(1)));

        let now = Utc::now();
        assert_eq!(store.claim_batch(&claim(now, 10)).await.unwrap().len(), 1);
        assert!(store.claim_batch(&claim(now, 10)).await.unwrap().is_empty());

        // Lease expired
        let later = now + Duration::seconds(31);
        assert_eq!(store.claim_batch(&claim(later, 10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_complete() {
        let store = InMemoryStore::new();
        store.enqueue(new_message("Placed", Utc::now() - Duration::seconds(1)));

        let now = Utc::now();
        let stale = store.claim_batch(&claim(now, 1)).await.unwrap().remove(0);
        let fresh = store
            .claim_batch(&claim(now + Duration::seconds(31), 1))
            .await
            .unwrap()
            .remove(0);

        assert!(!store
            .mark_processed(stale.id, stale.lease_token.unwrap(), now)
            .await
            .unwrap());
        assert!(store
            .mark_processed(fresh.id, fresh.lease_token.unwrap(), now)
            .await
            .unwrap());
        assert_eq!(store.message(fresh.id).unwrap().status(), OutboxStatus::Processed);
    }

    #[tokio::test]
    async fn test_failure_past_ceiling_dead_letters() {
        let store = InMemoryStore::new();
        let msg = store.enqueue(new_message("Placed", Utc::now() - Duration::seconds(1)));

        let now = Utc::now();
        let claimed = store.claim_batch(&claim(now, 1)).await.unwrap().remove(0);
        let outcome = store.mark_failed(&failure(&claimed, 1, now)).await.unwrap().unwrap();
        assert_eq!(outcome, FailureOutcome { retry_count: 1, dead_lettered: false });

        let claimed = store.claim_batch(&claim(now, 1)).await.unwrap().remove(0);
        let outcome = store.mark_failed(&failure(&claimed, 1, now)).await.unwrap().unwrap();
        assert_eq!(outcome, FailureOutcome { retry_count: 2, dead_lettered: true });

        assert!(store.claim_batch(&claim(now, 1)).await.unwrap().is_empty());
        let dead = store.list_dead(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, msg.id);
        assert_eq!(dead[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_replay_requires_dead_message() {
        let store = InMemoryStore::new();
        let msg = store.enqueue(new_message("Placed", Utc::now()));

        let err = store.replay(msg.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));

        let err = store.replay(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_counts_each_status() {
        let store = InMemoryStore::new();
        let t0 = Utc::now() - Duration::seconds(5);
        store.enqueue(new_message("A", t0));
        store.enqueue(new_message("B", t0 + Duration::seconds(1)));
        store.enqueue(new_message("C", t0 + Duration::seconds(2)));

        let now = Utc::now();
        let claimed = store.claim_batch(&claim(now, 1)).await.unwrap().remove(0);
        store
            .mark_processed(claimed.id, claimed.lease_token.unwrap(), now)
            .await
            .unwrap();
        store.claim_batch(&claim(now, 1)).await.unwrap();

        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dead, 0);
        assert_eq!(stats.oldest_pending_at, Some(t0 + Duration::seconds(2)));
    }
}
