//! PostgreSQL store
//!
//! Entity rows and outbox messages share one database so a unit of work is
//! a single transaction. Claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! dispatchers never lease the same message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::outbox::{NewOutboxMessage, OutboxMessage, OutboxStats};

use super::{
    ClaimRequest, EntityRow, EntityStore, EntityWrite, FailureOutcome, FailureUpdate, OutboxStore,
    RowScope, StoreError, UnitOfWork, UnitOfWorkStore,
};

const OUTBOX_COLUMNS: &str = r#"id, "type", content, occurred_on_utc, processed_on_utc, error,
    retry_count, sequence, lease_token, locked_until, claimed_by, next_attempt_at,
    dead_lettered_on_utc"#;

const ENTITY_COLUMNS: &str = "id, created_at, updated_at, is_deleted, version, data";

/// Store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_entity(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        write: &EntityWrite,
    ) -> Result<(), StoreError> {
        let row = &write.row;

        let result = if write.expected_version == 0 {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
                write.table, ENTITY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(row.id)
                .bind(row.created_at)
                .bind(row.updated_at)
                .bind(row.is_deleted)
                .bind(row.version)
                .bind(&row.data)
                .execute(&mut **tx)
                .await?
        } else {
            let sql = format!(
                r#"
                UPDATE {}
                SET updated_at = $2, is_deleted = $3, version = $4, data = $5
                WHERE id = $1 AND version = $6
                "#,
                write.table
            );
            sqlx::query(&sql)
                .bind(row.id)
                .bind(row.updated_at)
                .bind(row.is_deleted)
                .bind(row.version)
                .bind(&row.data)
                .bind(write.expected_version)
                .execute(&mut **tx)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrencyConflict {
                entity_type: write.entity_type,
                id: row.id,
                expected: write.expected_version,
            });
        }

        Ok(())
    }

    async fn insert_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &NewOutboxMessage,
    ) -> Result<OutboxMessage, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO outbox_messages (id, "type", content, occurred_on_utc, next_attempt_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );

        let stored = sqlx::query_as::<_, OutboxMessage>(&sql)
            .bind(message.id)
            .bind(&message.message_type)
            .bind(&message.content)
            .bind(message.occurred_on_utc)
            .fetch_one(&mut **tx)
            .await?;

        Ok(stored)
    }
}

#[async_trait]
impl UnitOfWorkStore for PgStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut tx = self.pool.begin().await?;

        for write in &unit.writes {
            self.write_entity(&mut tx, write).await?;
        }

        let mut records = Vec::with_capacity(unit.messages.len());
        for message in &unit.messages {
            records.push(self.insert_message(&mut tx, message).await?);
        }

        tx.commit().await?;

        Ok(records)
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn fetch_row(
        &self,
        table: &'static str,
        id: Uuid,
        scope: RowScope<'_>,
    ) -> Result<Option<EntityRow>, StoreError> {
        let mut sql = format!("SELECT {} FROM {} WHERE id = $1", ENTITY_COLUMNS, table);
        if let Some(filter) = scope.filter() {
            sql.push_str(" AND ");
            sql.push_str(filter.predicate_sql());
        }

        let row = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn fetch_rows(
        &self,
        table: &'static str,
        scope: RowScope<'_>,
    ) -> Result<Vec<EntityRow>, StoreError> {
        let mut sql = format!("SELECT {} FROM {}", ENTITY_COLUMNS, table);
        if let Some(filter) = scope.filter() {
            sql.push_str(" WHERE ");
            sql.push_str(filter.predicate_sql());
        }
        sql.push_str(" ORDER BY created_at, id");

        let rows = sqlx::query_as::<_, EntityRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<OutboxMessage>, StoreError> {
        let locked_until = request.lease_expires_at()?;
        let batch_size = i64::try_from(request.batch_size).unwrap_or(i64::MAX);

        let sql = format!(
            r#"
            UPDATE outbox_messages
            SET lease_token = gen_random_uuid(), locked_until = $2, claimed_by = $3
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE processed_on_utc IS NULL
                  AND dead_lettered_on_utc IS NULL
                  AND (locked_until IS NULL OR locked_until < $1)
                  AND next_attempt_at <= $1
                ORDER BY occurred_on_utc, sequence
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );

        let mut claimed = sqlx::query_as::<_, OutboxMessage>(&sql)
            .bind(request.now)
            .bind(locked_until)
            .bind(&request.worker_id)
            .bind(batch_size)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING order is unspecified
        claimed.sort_by_key(|m| (m.occurred_on_utc, m.sequence));

        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        lease_token: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET processed_on_utc = $3, error = NULL, lease_token = NULL, locked_until = NULL
            WHERE id = $1 AND lease_token = $2 AND processed_on_utc IS NULL
            "#,
        )
        .bind(id)
        .bind(lease_token)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, failure: &FailureUpdate) -> Result<Option<FailureOutcome>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                error = $3,
                lease_token = NULL,
                locked_until = NULL,
                next_attempt_at = $5,
                dead_lettered_on_utc = CASE WHEN retry_count + 1 > $4 THEN $6 ELSE NULL END
            WHERE id = $1 AND lease_token = $2 AND processed_on_utc IS NULL
            RETURNING retry_count, dead_lettered_on_utc IS NOT NULL AS dead_lettered
            "#,
        )
        .bind(failure.id)
        .bind(failure.lease_token)
        .bind(&failure.error)
        .bind(failure.max_retries)
        .bind(failure.next_attempt_at)
        .bind(failure.now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FailureOutcome {
            retry_count: row.get("retry_count"),
            dead_lettered: row.get("dead_lettered"),
        }))
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError> {
        let sql = format!("SELECT {} FROM outbox_messages WHERE id = $1", OUTBOX_COLUMNS);
        let message = sqlx::query_as::<_, OutboxMessage>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM outbox_messages
            WHERE dead_lettered_on_utc IS NOT NULL AND processed_on_utc IS NULL
            ORDER BY dead_lettered_on_utc DESC
            LIMIT $1
            "#,
            OUTBOX_COLUMNS
        );
        let messages = sqlx::query_as::<_, OutboxMessage>(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(messages)
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> Result<OutboxMessage, StoreError> {
        let sql = format!(
            r#"
            UPDATE outbox_messages
            SET retry_count = 0,
                dead_lettered_on_utc = NULL,
                next_attempt_at = $2,
                lease_token = NULL,
                locked_until = NULL
            WHERE id = $1 AND dead_lettered_on_utc IS NOT NULL AND processed_on_utc IS NULL
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        );

        let replayed = sqlx::query_as::<_, OutboxMessage>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match replayed {
            Some(message) => Ok(message),
            None => match self.get(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(message) => Err(StoreError::InvalidState(format!(
                    "message {} is {}, only dead messages can be replayed",
                    id,
                    message.status_at(now)
                ))),
            },
        }
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_on_utc IS NULL AND dead_lettered_on_utc IS NULL
                    AND (locked_until IS NULL OR locked_until < $1)) AS pending,
                COUNT(*) FILTER (WHERE processed_on_utc IS NULL AND dead_lettered_on_utc IS NULL
                    AND locked_until >= $1) AS processing,
                COUNT(*) FILTER (WHERE processed_on_utc IS NOT NULL) AS processed,
                COUNT(*) FILTER (WHERE processed_on_utc IS NULL
                    AND dead_lettered_on_utc IS NOT NULL) AS dead,
                MIN(occurred_on_utc) FILTER (WHERE processed_on_utc IS NULL
                    AND dead_lettered_on_utc IS NULL
                    AND (locked_until IS NULL OR locked_until < $1)) AS oldest_pending_at
            FROM outbox_messages
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending: row.get("pending"),
            processing: row.get("processing"),
            processed: row.get("processed"),
            dead: row.get("dead"),
            oldest_pending_at: row.get("oldest_pending_at"),
        })
    }
}
