//! Postgres-backed persistence for domain events.

pub mod domain_events;

use std::sync::Arc;

use sqlx::PgPool;

use crate::error::Result;

/// Container wiring repositories to a shared connection pool.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Repository for the domain event outbox table.
    pub domain_events: Arc<domain_events::Repository>,
}

impl Storage {
    /// Creates storage backed by the given pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            domain_events: Arc::new(domain_events::Repository::new(pool)),
        }
    }

    /// Verifies database connectivity with a trivial query.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(&**self.domain_events.pool())
            .await?;
        Ok(())
    }
}

/// Creates the event table and its indexes if they do not exist.
///
/// The partial index on `next_eligible_at` keeps the claim query fast even
/// when the table is dominated by terminal records.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS domain_events (
            id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            next_eligible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_domain_events_pending
        ON domain_events (next_eligible_at, created_at)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_domain_events_created_at
        ON domain_events (created_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_domain_events_aggregate
        ON domain_events (aggregate_id, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        let pool = PgPool::connect_lazy("postgresql://test").unwrap();
        let storage = Storage::new(pool);
        assert_eq!(Arc::strong_count(&storage.domain_events), 1);
    }
}
