//! Storage abstraction between the dispatch engine and the event table.
//!
//! Workers and the publishing facade depend on [`EventStore`] rather than on
//! sqlx directly, so delivery logic is testable against the in-memory
//! [`mock::MockEventStore`] without a database.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aqua_core::error::Result;
use aqua_core::models::{DomainEvent, EventId, EventStatus};
use aqua_core::storage::Storage;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence operations needed by publishing and dispatch.
///
/// Mirrors the repository surface one-to-one; implementations must keep the
/// state machine rules (claim exclusivity, frozen terminal states) intact.
pub trait EventStore: Send + Sync + 'static {
    /// Inserts a new pending event.
    fn insert<'a>(&'a self, event: &'a DomainEvent) -> StoreFuture<'a, EventId>;

    /// Inserts a new pending event inside the caller's transaction, making
    /// the event atomic with the business change it describes.
    fn insert_in_tx<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        event: &'a DomainEvent,
    ) -> StoreFuture<'a, EventId>;

    /// Claims up to `max_count` eligible pending events, moving them to
    /// `in_flight`. No two concurrent callers receive the same event.
    fn claim_next_batch(
        &self,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<DomainEvent>>;

    /// Marks an event delivered. No-op for terminal records.
    fn mark_delivered(&self, id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Records a failed attempt and reschedules the event as pending.
    fn mark_failed(
        &self,
        id: EventId,
        attempt_count: i32,
        next_eligible_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Dead-letters an event. No-op for terminal records.
    fn mark_dead(&self, id: EventId, error: String, now: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Fetches one event by id.
    fn find_event(&self, id: EventId) -> StoreFuture<'_, Option<DomainEvent>>;

    /// Queries events created within `[start, end)` with optional filters.
    fn find_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<Vec<String>>,
        statuses: Option<Vec<EventStatus>>,
    ) -> StoreFuture<'_, Vec<DomainEvent>>;

    /// Requeues dead-lettered events, optionally only those dead-lettered
    /// before a cutoff. Returns how many were reset.
    fn retry_dead_letters(
        &self,
        before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u64>;

    /// Deletes terminal events created before the cutoff.
    fn cleanup(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, u64>;

    /// Counts events per lifecycle state.
    fn count_by_status(&self) -> StoreFuture<'_, HashMap<EventStatus, i64>>;

    /// Cheap connectivity probe.
    fn health_check(&self) -> StoreFuture<'_, ()>;
}

/// Production [`EventStore`] backed by the Postgres repository.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    storage: Arc<Storage>,
}

impl PostgresEventStore {
    /// Wraps shared storage as an event store.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl EventStore for PostgresEventStore {
    fn insert<'a>(&'a self, event: &'a DomainEvent) -> StoreFuture<'a, EventId> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.create(event).await })
    }

    fn insert_in_tx<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        event: &'a DomainEvent,
    ) -> StoreFuture<'a, EventId> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.create_in_tx(tx, event).await })
    }

    fn claim_next_batch(
        &self,
        max_count: usize,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<DomainEvent>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.claim_pending(max_count, now).await })
    }

    fn mark_delivered(&self, id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.mark_delivered(id, now).await })
    }

    fn mark_failed(
        &self,
        id: EventId,
        attempt_count: i32,
        next_eligible_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .domain_events
                .mark_failed(id, attempt_count, next_eligible_at, &error, now)
                .await
        })
    }

    fn mark_dead(&self, id: EventId, error: String, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.mark_dead(id, &error, now).await })
    }

    fn find_event(&self, id: EventId) -> StoreFuture<'_, Option<DomainEvent>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.find_by_id(id).await })
    }

    fn find_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<Vec<String>>,
        statuses: Option<Vec<EventStatus>>,
    ) -> StoreFuture<'_, Vec<DomainEvent>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .domain_events
                .find_in_range(start, end, event_types.as_deref(), statuses.as_deref())
                .await
        })
    }

    fn retry_dead_letters(
        &self,
        before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, u64> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.retry_dead_letters(before, now).await })
    }

    fn cleanup(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, u64> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.cleanup(older_than).await })
    }

    fn count_by_status(&self) -> StoreFuture<'_, HashMap<EventStatus, i64>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.domain_events.count_by_status().await })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory store double carrying the full event state machine.
    //!
    //! Claims run under a single write lock; concurrent claimants never
    //! receive the same event.

    use aqua_core::error::CoreError;
    use tokio::sync::RwLock;

    use super::*;

    /// In-memory [`EventStore`] for tests.
    ///
    /// Clones share state. Transactional visibility is not modeled;
    /// `insert_in_tx` behaves like a plain insert.
    #[derive(Debug, Clone, Default)]
    pub struct MockEventStore {
        events: Arc<RwLock<HashMap<EventId, DomainEvent>>>,
        insert_error: Arc<RwLock<Option<String>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockEventStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Stores a record directly, bypassing insert validation.
        pub async fn seed(&self, event: DomainEvent) {
            self.events.write().await.insert(event.id, event);
        }

        /// Returns a snapshot of one event.
        pub async fn event(&self, id: EventId) -> Option<DomainEvent> {
            self.events.read().await.get(&id).cloned()
        }

        /// Returns the lifecycle state of one event.
        pub async fn status_of(&self, id: EventId) -> Option<EventStatus> {
            self.events.read().await.get(&id).map(|event| event.status)
        }

        /// Returns all events in the given state, oldest first.
        pub async fn events_with_status(&self, status: EventStatus) -> Vec<DomainEvent> {
            let mut matching: Vec<DomainEvent> = self
                .events
                .read()
                .await
                .values()
                .filter(|event| event.status == status)
                .cloned()
                .collect();
            matching.sort_by_key(|event| (event.created_at, event.id.0));
            matching
        }

        /// Makes subsequent inserts fail with a database error.
        pub async fn inject_insert_error(&self, message: impl Into<String>) {
            *self.insert_error.write().await = Some(message.into());
        }

        /// Makes subsequent claims fail with a database error.
        pub async fn inject_claim_error(&self, message: impl Into<String>) {
            *self.claim_error.write().await = Some(message.into());
        }

        /// Clears injected failures.
        pub async fn clear_injected_errors(&self) {
            *self.insert_error.write().await = None;
            *self.claim_error.write().await = None;
        }

        async fn insert_impl(&self, event: &DomainEvent) -> Result<EventId> {
            if let Some(message) = self.insert_error.read().await.clone() {
                return Err(CoreError::Database(message));
            }
            let mut events = self.events.write().await;
            if events.contains_key(&event.id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "duplicate event id: {}",
                    event.id
                )));
            }
            events.insert(event.id, event.clone());
            Ok(event.id)
        }
    }

    impl EventStore for MockEventStore {
        fn insert<'a>(&'a self, event: &'a DomainEvent) -> StoreFuture<'a, EventId> {
            Box::pin(self.insert_impl(event))
        }

        fn insert_in_tx<'a>(
            &'a self,
            _tx: &'a mut Transaction<'static, Postgres>,
            event: &'a DomainEvent,
        ) -> StoreFuture<'a, EventId> {
            Box::pin(self.insert_impl(event))
        }

        fn claim_next_batch(
            &self,
            max_count: usize,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, Vec<DomainEvent>> {
            let events = self.events.clone();
            let claim_error = self.claim_error.clone();
            Box::pin(async move {
                if let Some(message) = claim_error.read().await.clone() {
                    return Err(CoreError::Database(message));
                }

                let mut events = events.write().await;
                let mut eligible: Vec<(DateTime<Utc>, EventId)> = events
                    .values()
                    .filter(|event| {
                        event.status == EventStatus::Pending && event.next_eligible_at <= now
                    })
                    .map(|event| (event.created_at, event.id))
                    .collect();
                eligible.sort_by_key(|(created_at, id)| (*created_at, id.0));

                let mut claimed = Vec::new();
                for (_, id) in eligible.into_iter().take(max_count) {
                    if let Some(event) = events.get_mut(&id) {
                        event.status = EventStatus::InFlight;
                        event.updated_at = now;
                        claimed.push(event.clone());
                    }
                }
                Ok(claimed)
            })
        }

        fn mark_delivered(&self, id: EventId, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&id) {
                    if !event.status.is_terminal() {
                        event.status = EventStatus::Delivered;
                        event.last_error = None;
                        event.updated_at = now;
                    }
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            id: EventId,
            attempt_count: i32,
            next_eligible_at: DateTime<Utc>,
            error: String,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&id) {
                    if !event.status.is_terminal() {
                        event.status = EventStatus::Pending;
                        event.attempt_count = attempt_count;
                        event.next_eligible_at = next_eligible_at;
                        event.last_error = Some(error);
                        event.updated_at = now;
                    }
                }
                Ok(())
            })
        }

        fn mark_dead(&self, id: EventId, error: String, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
            let events = self.events.clone();
            Box::pin(async move {
                if let Some(event) = events.write().await.get_mut(&id) {
                    if !event.status.is_terminal() {
                        event.status = EventStatus::Dead;
                        event.last_error = Some(error);
                        event.updated_at = now;
                    }
                }
                Ok(())
            })
        }

        fn find_event(&self, id: EventId) -> StoreFuture<'_, Option<DomainEvent>> {
            let events = self.events.clone();
            Box::pin(async move { Ok(events.read().await.get(&id).cloned()) })
        }

        fn find_in_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            event_types: Option<Vec<String>>,
            statuses: Option<Vec<EventStatus>>,
        ) -> StoreFuture<'_, Vec<DomainEvent>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut matching: Vec<DomainEvent> = events
                    .read()
                    .await
                    .values()
                    .filter(|event| event.created_at >= start && event.created_at < end)
                    .filter(|event| {
                        event_types
                            .as_ref()
                            .is_none_or(|types| types.contains(&event.event_type))
                    })
                    .filter(|event| {
                        statuses
                            .as_ref()
                            .is_none_or(|statuses| statuses.contains(&event.status))
                    })
                    .cloned()
                    .collect();
                matching.sort_by_key(|event| (event.created_at, event.id.0));
                Ok(matching)
            })
        }

        fn retry_dead_letters(
            &self,
            before: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, u64> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut requeued = 0u64;
                for event in events.write().await.values_mut() {
                    let in_window = before.is_none_or(|cutoff| event.updated_at < cutoff);
                    if event.status == EventStatus::Dead && in_window {
                        event.status = EventStatus::Pending;
                        event.attempt_count = 0;
                        event.next_eligible_at = now;
                        event.last_error = None;
                        event.updated_at = now;
                        requeued += 1;
                    }
                }
                Ok(requeued)
            })
        }

        fn cleanup(&self, older_than: DateTime<Utc>) -> StoreFuture<'_, u64> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut events = events.write().await;
                let before = events.len();
                events.retain(|_, event| {
                    !(event.status.is_terminal() && event.created_at < older_than)
                });
                Ok((before - events.len()) as u64)
            })
        }

        fn count_by_status(&self) -> StoreFuture<'_, HashMap<EventStatus, i64>> {
            let events = self.events.clone();
            Box::pin(async move {
                let mut counts = HashMap::new();
                for event in events.read().await.values() {
                    *counts.entry(event.status).or_insert(0) += 1;
                }
                Ok(counts)
            })
        }

        fn health_check(&self) -> StoreFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }
}
