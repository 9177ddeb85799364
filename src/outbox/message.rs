//! Outbox message
//!
//! Durable record of one occurred event. Rows are never deleted by this
//! crate; processed and dead-lettered rows double as an audit and replay log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status, derived from the row's columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Dead,
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Processing => write!(f, "processing"),
            OutboxStatus::Processed => write!(f, "processed"),
            OutboxStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Stored outbox message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,

    /// Event discriminator
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub message_type: String,

    /// Serialized event payload
    pub content: serde_json::Value,

    pub occurred_on_utc: DateTime<Utc>,
    pub processed_on_utc: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: i32,

    /// Insertion order, tie-break for equal `occurred_on_utc`
    pub sequence: i64,

    pub lease_token: Option<Uuid>,
    pub locked_until: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub dead_lettered_on_utc: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Status at `now`; an expired lease counts as pending
    pub fn status_at(&self, now: DateTime<Utc>) -> OutboxStatus {
        if self.processed_on_utc.is_some() {
            OutboxStatus::Processed
        } else if self.dead_lettered_on_utc.is_some() {
            OutboxStatus::Dead
        } else if self.locked_until.map_or(false, |until| until >= now) {
            OutboxStatus::Processing
        } else {
            OutboxStatus::Pending
        }
    }

    pub fn status(&self) -> OutboxStatus {
        self.status_at(Utc::now())
    }

    /// Whether a dispatcher may claim this message at `now`
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == OutboxStatus::Pending && self.next_attempt_at <= now
    }
}

/// Outbox message about to be inserted by the save coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub content: serde_json::Value,
    pub occurred_on_utc: DateTime<Utc>,
}

impl NewOutboxMessage {
    /// Fresh row as stored: unprocessed, no lease, immediately eligible
    pub fn into_message(self, sequence: i64) -> OutboxMessage {
        OutboxMessage {
            id: self.id,
            message_type: self.message_type,
            content: self.content,
            occurred_on_utc: self.occurred_on_utc,
            processed_on_utc: None,
            error: None,
            retry_count: 0,
            sequence,
            lease_token: None,
            locked_until: None,
            claimed_by: None,
            next_attempt_at: self.occurred_on_utc,
            dead_lettered_on_utc: None,
        }
    }
}

/// Counts per status, for operators
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub processing: i64,
    pub processed: i64,
    pub dead: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}
