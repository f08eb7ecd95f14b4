//! Publishing facade for request-path services.
//!
//! The publisher is the only write path for new events. It stores the event
//! as pending and, when the strategy calls for it, offers a hint so a fast
//! worker picks the event up without waiting out its poll interval. Losing a
//! hint is harmless: the stored row is the source of truth and the next poll
//! finds it.

use std::sync::Arc;

use aqua_core::models::DomainEvent;
use aqua_core::time::Clock;
use aqua_core::EventId;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use tracing::{debug, error, info};

use crate::config::MessagingConfig;
use crate::error::{DispatchError, Result};
use crate::queue::HintQueue;
use crate::routing::{RoutingTable, StrategyMode};
use crate::store::EventStore;

/// An event waiting to be published.
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Event type name, e.g. `ORDER_PAID`.
    pub event_type: String,
    /// Aggregate the event belongs to, e.g. an order id.
    pub aggregate_id: String,
    /// JSON payload.
    pub payload: serde_json::Value,
}

impl EventDraft {
    /// Builds a draft, serializing the payload up front.
    ///
    /// Serialization failures surface here, at the call site that produced
    /// the payload, never later on the dispatch path.
    pub fn new<T>(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|error| DispatchError::serialization(error.to_string()))?;
        Ok(Self {
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
        })
    }
}

/// Writes events to the store and nudges fast workers.
#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
    hints: HintQueue,
    routing: RoutingTable,
    strategy: StrategyMode,
    hints_enabled: bool,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    /// Creates a publisher wired to the given store and configuration.
    pub fn new(
        store: Arc<dyn EventStore>,
        hints: HintQueue,
        config: &MessagingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let routing = RoutingTable::new(
            config.memory_queue.high_frequency_events.iter().cloned(),
            config.memory_queue.low_frequency_events.iter().cloned(),
        );
        Self {
            store,
            hints,
            routing,
            strategy: config.strategy,
            hints_enabled: config.memory_queue.enabled,
            clock,
        }
    }

    /// Publishes an event and returns its id.
    pub async fn try_publish<T>(
        &self,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<EventId>
    where
        T: Serialize + ?Sized,
    {
        let draft = EventDraft::new(event_type, aggregate_id, payload)?;
        self.publish_draft(draft).await
    }

    /// Publishes an event, logging failures instead of returning them.
    ///
    /// Request-path callers use this form: a store outage must degrade event
    /// delivery, not fail the business operation that produced the event.
    /// Returns false when the event could not be stored.
    pub async fn publish<T>(
        &self,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> bool
    where
        T: Serialize + ?Sized,
    {
        let event_type = event_type.into();
        let aggregate_id = aggregate_id.into();
        match self
            .try_publish(event_type.clone(), aggregate_id.clone(), payload)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                error!(
                    event_type = %event_type,
                    aggregate_id = %aggregate_id,
                    error = %error,
                    "event publish failed"
                );
                false
            }
        }
    }

    /// Publishes drafts in order, returning one result per draft.
    ///
    /// A failed draft does not stop the rest of the batch.
    pub async fn publish_batch(&self, drafts: Vec<EventDraft>) -> Vec<bool> {
        let mut results = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let event_type = draft.event_type.clone();
            let aggregate_id = draft.aggregate_id.clone();
            match self.publish_draft(draft).await {
                Ok(_) => results.push(true),
                Err(error) => {
                    error!(
                        event_type = %event_type,
                        aggregate_id = %aggregate_id,
                        error = %error,
                        "event publish failed"
                    );
                    results.push(false);
                }
            }
        }
        results
    }

    /// Publishes an event inside the caller's transaction.
    ///
    /// The event becomes visible to workers only when the transaction
    /// commits, so it is stored if and only if the business change is. No
    /// hint is offered here; commit timing belongs to the caller, and a
    /// hint for an uncommitted row would only produce empty claims.
    pub async fn publish_in_tx<T>(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<EventId>
    where
        T: Serialize + ?Sized,
    {
        let draft = EventDraft::new(event_type, aggregate_id, payload)?;
        let event = DomainEvent::new(
            draft.event_type,
            draft.aggregate_id,
            draft.payload,
            self.clock.now_utc(),
        );
        let id = self.store.insert_in_tx(tx, &event).await?;
        info!(
            event_id = %id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "event published in transaction"
        );
        Ok(id)
    }

    async fn publish_draft(&self, draft: EventDraft) -> Result<EventId> {
        let event = DomainEvent::new(
            draft.event_type,
            draft.aggregate_id,
            draft.payload,
            self.clock.now_utc(),
        );
        let id = self.store.insert(&event).await?;
        info!(
            event_id = %id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "event published"
        );
        self.offer_hint(&event);
        Ok(id)
    }

    fn offer_hint(&self, event: &DomainEvent) {
        if !self.hints_enabled {
            return;
        }
        let class = self.routing.classify(&event.event_type);
        if !self.strategy.hints_class(class) {
            return;
        }
        match self.hints.offer(event.id) {
            Ok(()) => {}
            Err(DispatchError::QueueFull) => {
                debug!(
                    event_id = %event.id,
                    "hint queue full, workers will find the event by polling"
                );
            }
            Err(error) => {
                debug!(event_id = %event.id, error = %error, "hint not offered");
            }
        }
    }
}
