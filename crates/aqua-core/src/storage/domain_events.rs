//! Repository for the `domain_events` outbox table.
//!
//! All state transitions run through guarded UPDATEs so that terminal
//! records are never mutated and repeated calls are harmless. Claiming uses
//! `FOR UPDATE SKIP LOCKED` inside a transaction, which lets concurrent
//! workers drain the table without handing the same event to two of them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DomainEvent, EventId, EventStatus};

/// Data access for persisted domain events.
#[derive(Debug)]
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a repository backed by the given pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    /// Inserts a new event record.
    ///
    /// Fails with a constraint violation if the id already exists.
    pub async fn create(&self, event: &DomainEvent) -> Result<EventId> {
        self.create_impl(&*self.pool, event).await
    }

    /// Inserts a new event record inside an existing transaction.
    ///
    /// The record becomes visible to dispatch workers only when the caller's
    /// transaction commits, so the event and the business change it describes
    /// succeed or fail together.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
    ) -> Result<EventId> {
        self.create_impl(&mut **tx, event).await
    }

    async fn create_impl<'e, E>(&self, executor: E, event: &DomainEvent) -> Result<EventId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO domain_events (
                id, event_type, aggregate_id, payload, status,
                attempt_count, last_error, created_at, next_eligible_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.payload)
        .bind(event.status.to_string())
        .bind(event.attempt_count)
        .bind(&event.last_error)
        .bind(event.created_at)
        .bind(event.next_eligible_at)
        .bind(event.updated_at)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }

    /// Claims up to `batch_size` eligible pending events for delivery.
    ///
    /// Selected rows are locked with `SKIP LOCKED` and moved to `in_flight`
    /// before the claiming transaction commits, so two workers never receive
    /// the same event. Returns claimed events oldest first.
    pub async fn claim_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DomainEvent>> {
        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM domain_events
            WHERE status = 'pending' AND next_eligible_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(batch_size as i32)
        .fetch_all(&mut *tx)
        .await?;

        if event_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut events = sqlx::query_as::<_, DomainEvent>(
            r#"
            UPDATE domain_events
            SET status = 'in_flight', updated_at = $2
            WHERE id = ANY($1)
            RETURNING id, event_type, aggregate_id, payload, status,
                      attempt_count, last_error, created_at, next_eligible_at, updated_at
            "#,
        )
        .bind(&event_ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        events.sort_by_key(|event| event.created_at);
        Ok(events)
    }

    /// Marks an event as successfully delivered.
    ///
    /// Terminal records are left untouched, so repeated calls are no-ops.
    pub async fn mark_delivered(&self, id: EventId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE domain_events
            SET status = 'delivered', last_error = NULL, updated_at = $2
            WHERE id = $1 AND status NOT IN ('delivered', 'dead')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Records a failed attempt and reschedules the event.
    ///
    /// The event returns to `pending` with the new attempt count and becomes
    /// claimable again once `next_eligible_at` passes. Terminal records are
    /// left untouched.
    pub async fn mark_failed(
        &self,
        id: EventId,
        attempt_count: i32,
        next_eligible_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE domain_events
            SET status = 'pending', attempt_count = $2, next_eligible_at = $3,
                last_error = $4, updated_at = $5
            WHERE id = $1 AND status NOT IN ('delivered', 'dead')
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_eligible_at)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Moves an event to the dead-letter state.
    ///
    /// Dead events are excluded from claiming until explicitly retried.
    /// Terminal records are left untouched.
    pub async fn mark_dead(&self, id: EventId, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE domain_events
            SET status = 'dead', last_error = $2, updated_at = $3
            WHERE id = $1 AND status NOT IN ('delivered', 'dead')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Fetches a single event by id.
    pub async fn find_by_id(&self, id: EventId) -> Result<Option<DomainEvent>> {
        let event = sqlx::query_as::<_, DomainEvent>(
            r#"
            SELECT id, event_type, aggregate_id, payload, status,
                   attempt_count, last_error, created_at, next_eligible_at, updated_at
            FROM domain_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(event)
    }

    /// Queries events created within `[start, end)`, optionally filtered by
    /// event type and status. Results are ordered oldest first.
    pub async fn find_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<&[String]>,
        statuses: Option<&[EventStatus]>,
    ) -> Result<Vec<DomainEvent>> {
        let status_names =
            statuses.map(|statuses| statuses.iter().map(ToString::to_string).collect::<Vec<_>>());

        let events = sqlx::query_as::<_, DomainEvent>(
            r#"
            SELECT id, event_type, aggregate_id, payload, status,
                   attempt_count, last_error, created_at, next_eligible_at, updated_at
            FROM domain_events
            WHERE created_at >= $1 AND created_at < $2
              AND ($3::text[] IS NULL OR event_type = ANY($3))
              AND ($4::text[] IS NULL OR status = ANY($4))
            ORDER BY created_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(event_types)
        .bind(status_names)
        .fetch_all(&*self.pool)
        .await?;
        Ok(events)
    }

    /// Returns dead-lettered events to `pending` with a fresh attempt budget.
    ///
    /// When `before` is given, only events dead-lettered before that cutoff
    /// are reset. Returns the number of events requeued.
    pub async fn retry_dead_letters(
        &self,
        before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE domain_events
            SET status = 'pending', attempt_count = 0, next_eligible_at = $2,
                last_error = NULL, updated_at = $2
            WHERE status = 'dead' AND ($1::timestamptz IS NULL OR updated_at < $1)
            "#,
        )
        .bind(before)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes terminal events created before the cutoff. Returns the number
    /// of rows removed.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM domain_events
            WHERE status IN ('delivered', 'dead') AND created_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Counts events grouped by lifecycle state.
    pub async fn count_by_status(&self) -> Result<HashMap<EventStatus, i64>> {
        let rows: Vec<(EventStatus, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM domain_events GROUP BY status"#)
                .fetch_all(&*self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}
