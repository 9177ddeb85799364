//! API Routes
//!
//! Operator endpoints for inspecting the outbox and replaying dead messages.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::outbox::{OutboxMessage, OutboxStatus};

use super::AppState;

/// Upper bound for `limit` on list endpoints
const MAX_LIMIT: i64 = 500;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct DeadQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutboxMessageResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: String,
    pub status: OutboxStatus,
    pub content: serde_json::Value,
    pub occurred_on_utc: DateTime<Utc>,
    pub processed_on_utc: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub claimed_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub dead_lettered_on_utc: Option<DateTime<Utc>>,
}

impl OutboxMessageResponse {
    fn at(message: OutboxMessage, now: DateTime<Utc>) -> Self {
        Self {
            status: message.status_at(now),
            id: message.id,
            message_type: message.message_type,
            content: message.content,
            occurred_on_utc: message.occurred_on_utc,
            processed_on_utc: message.processed_on_utc,
            error: message.error,
            retry_count: message.retry_count,
            claimed_by: message.claimed_by,
            locked_until: message.locked_until,
            next_attempt_at: message.next_attempt_at,
            dead_lettered_on_utc: message.dead_lettered_on_utc,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeadListResponse {
    pub messages: Vec<OutboxMessageResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending: i64,
    pub processing: i64,
    pub processed: i64,
    pub dead: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub oldest_pending_age_secs: Option<i64>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the outbox admin router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/outbox/stats", get(get_stats))
        .route("/outbox/dead", get(list_dead))
        .route("/outbox/:message_id", get(get_message))
        .route("/outbox/:message_id/replay", post(replay_message))
}

// =========================================================================
// GET /outbox/stats
// =========================================================================

/// Counts per status and the age of the oldest pending message
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let now = Utc::now();
    let stats = state.outbox.stats(now).await?;

    Ok(Json(StatsResponse {
        pending: stats.pending,
        processing: stats.processing,
        processed: stats.processed,
        dead: stats.dead,
        oldest_pending_at: stats.oldest_pending_at,
        oldest_pending_age_secs: stats
            .oldest_pending_at
            .map(|at| (now - at).num_seconds().max(0)),
    }))
}

// =========================================================================
// GET /outbox/dead
// =========================================================================

/// List dead-lettered messages, most recent first
async fn list_dead(
    State(state): State<AppState>,
    Query(query): Query<DeadQuery>,
) -> Result<Json<DeadListResponse>, AppError> {
    if !(1..=MAX_LIMIT).contains(&query.limit) {
        return Err(AppError::InvalidRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let now = Utc::now();
    let messages: Vec<_> = state
        .outbox
        .list_dead(query.limit)
        .await?
        .into_iter()
        .map(|m| OutboxMessageResponse::at(m, now))
        .collect();

    Ok(Json(DeadListResponse {
        count: messages.len(),
        messages,
    }))
}

// =========================================================================
// GET /outbox/:message_id
// =========================================================================

/// Get one outbox message by ID
async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<OutboxMessageResponse>, AppError> {
    let message = state
        .outbox
        .get(message_id)
        .await?
        .ok_or(AppError::MessageNotFound(message_id))?;

    Ok(Json(OutboxMessageResponse::at(message, Utc::now())))
}

// =========================================================================
// POST /outbox/:message_id/replay
// =========================================================================

/// Return a dead message to normal polling
async fn replay_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<OutboxMessageResponse>, AppError> {
    let now = Utc::now();
    let message = state.outbox.replay(message_id, now).await?;

    tracing::warn!(
        target: "audit",
        message_id = %message.id,
        message_type = %message.message_type,
        last_error = ?message.error,
        "Dead outbox message replayed"
    );

    Ok(Json(OutboxMessageResponse::at(message, now)))
}
