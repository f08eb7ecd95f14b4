//! Postgres integration tests for the domain event repository.
//!
//! These tests need a live database and are ignored by default. Set
//! `DATABASE_URL` and run them serially:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test -p aqua-core -- --ignored --test-threads=1
//! ```

use aqua_core::models::{event_type, DomainEvent, EventStatus};
use aqua_core::storage::{self, Storage};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;

async fn connect() -> Storage {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for Postgres integration tests");
    let pool = PgPool::connect(&url)
        .await
        .expect("failed to connect to Postgres");
    storage::migrate(&pool).await.expect("migration failed");
    sqlx::query("TRUNCATE domain_events")
        .execute(&pool)
        .await
        .expect("failed to reset table");
    Storage::new(pool)
}

fn paid_order(aggregate_id: &str) -> DomainEvent {
    DomainEvent::new(
        event_type::ORDER_PAID,
        aggregate_id,
        json!({"orderId": aggregate_id, "amount": 2500}),
        Utc::now(),
    )
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn insert_then_claim_moves_event_in_flight() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let event = paid_order("order-42");
    let id = repo.create(&event).await.unwrap();

    let claimed = repo.claim_pending(10, Utc::now()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].status, EventStatus::InFlight);

    repo.mark_delivered(id, Utc::now()).await.unwrap();
    let stored = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Delivered);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn claim_skips_events_not_yet_eligible() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let mut event = paid_order("order-7");
    event.next_eligible_at = Utc::now() + Duration::minutes(5);
    repo.create(&event).await.unwrap();

    let claimed = repo.claim_pending(10, Utc::now()).await.unwrap();
    assert!(claimed.is_empty());

    let claimed = repo
        .claim_pending(10, Utc::now() + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn claim_returns_oldest_events_first() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let base = Utc::now() - Duration::minutes(10);
    for i in 0..5 {
        let mut event = paid_order(&format!("order-{i}"));
        event.created_at = base + Duration::seconds(i);
        event.next_eligible_at = event.created_at;
        repo.create(&event).await.unwrap();
    }

    let claimed = repo.claim_pending(3, Utc::now()).await.unwrap();
    let aggregates: Vec<_> = claimed.iter().map(|e| e.aggregate_id.clone()).collect();
    assert_eq!(aggregates, vec!["order-0", "order-1", "order-2"]);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn concurrent_claims_never_share_events() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    for i in 0..5 {
        repo.create(&paid_order(&format!("order-{i}"))).await.unwrap();
    }

    let now = Utc::now();
    let first = storage.domain_events.clone();
    let second = storage.domain_events.clone();
    let (a, b) = tokio::join!(first.claim_pending(3, now), second.claim_pending(3, now));
    let a = a.unwrap();
    let b = b.unwrap();

    let mut ids: Vec<_> = a.iter().chain(b.iter()).map(|e| e.id).collect();
    ids.sort_by_key(|id| id.0);
    ids.dedup();
    assert_eq!(ids.len(), 5, "every event claimed exactly once");
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn terminal_states_are_never_overwritten() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let event = paid_order("order-1");
    let id = repo.create(&event).await.unwrap();
    repo.claim_pending(1, Utc::now()).await.unwrap();
    repo.mark_delivered(id, Utc::now()).await.unwrap();

    repo.mark_dead(id, "late failure", Utc::now()).await.unwrap();
    repo.mark_failed(id, 3, Utc::now(), "late retry", Utc::now())
        .await
        .unwrap();

    let stored = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Delivered);
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn duplicate_insert_is_rejected() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let event = paid_order("order-9");
    repo.create(&event).await.unwrap();
    let err = repo.create(&event).await.unwrap_err();
    assert!(matches!(
        err,
        aqua_core::CoreError::ConstraintViolation(_)
    ));
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn retry_dead_letters_requeues_only_dead_events() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let dead = paid_order("order-dead");
    let dead_id = repo.create(&dead).await.unwrap();
    repo.claim_pending(1, Utc::now()).await.unwrap();
    repo.mark_dead(dead_id, "broker down", Utc::now()).await.unwrap();

    let live = paid_order("order-live");
    let live_id = repo.create(&live).await.unwrap();

    let requeued = repo.retry_dead_letters(None, Utc::now()).await.unwrap();
    assert_eq!(requeued, 1);

    let stored = repo.find_by_id(dead_id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Pending);
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.last_error.is_none());

    let untouched = repo.find_by_id(live_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, EventStatus::Pending);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn cleanup_removes_only_old_terminal_events() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let mut old_delivered = paid_order("order-old");
    old_delivered.created_at = Utc::now() - Duration::days(40);
    old_delivered.next_eligible_at = old_delivered.created_at;
    let old_id = repo.create(&old_delivered).await.unwrap();
    repo.claim_pending(1, Utc::now()).await.unwrap();
    repo.mark_delivered(old_id, Utc::now()).await.unwrap();

    let mut old_pending = paid_order("order-stuck");
    old_pending.created_at = Utc::now() - Duration::days(40);
    old_pending.next_eligible_at = Utc::now() + Duration::days(1);
    let stuck_id = repo.create(&old_pending).await.unwrap();

    let removed = repo
        .cleanup(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    assert!(repo.find_by_id(old_id).await.unwrap().is_none());
    assert!(repo.find_by_id(stuck_id).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn create_in_tx_is_invisible_until_commit() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let event = paid_order("order-tx");
    let mut tx = repo.pool().begin().await.unwrap();
    let id = repo.create_in_tx(&mut tx, &event).await.unwrap();

    assert!(repo.find_by_id(id).await.unwrap().is_none());

    tx.commit().await.unwrap();
    assert!(repo.find_by_id(id).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn find_in_range_filters_by_type_and_status() {
    let storage = connect().await;
    let repo = &storage.domain_events;

    let start = Utc::now() - Duration::minutes(1);
    repo.create(&paid_order("order-a")).await.unwrap();
    let created = DomainEvent::new(
        event_type::ORDER_CREATED,
        "order-b",
        json!({"orderId": "order-b"}),
        Utc::now(),
    );
    repo.create(&created).await.unwrap();
    let end = Utc::now() + Duration::minutes(1);

    let all = repo.find_in_range(start, end, None, None).await.unwrap();
    assert_eq!(all.len(), 2);

    let paid_only = repo
        .find_in_range(
            start,
            end,
            Some(&[event_type::ORDER_PAID.to_string()]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(paid_only.len(), 1);
    assert_eq!(paid_only[0].aggregate_id, "order-a");

    let pending_only = repo
        .find_in_range(start, end, None, Some(&[EventStatus::Pending]))
        .await
        .unwrap();
    assert_eq!(pending_only.len(), 2);

    let counts = repo.count_by_status().await.unwrap();
    assert_eq!(counts.get(&EventStatus::Pending), Some(&2));
}
