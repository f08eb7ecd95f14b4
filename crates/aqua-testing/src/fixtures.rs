//! Builders for event rows in arbitrary states.

use aqua_core::models::{event_type, DomainEvent, EventStatus};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value};

/// Builder for domain event rows.
///
/// Unset fields fall back to a freshly published pending event: a random
/// order aggregate, zero attempts, eligible immediately.
pub struct EventBuilder {
    event_type: Option<String>,
    aggregate_id: Option<String>,
    payload: Option<Value>,
    status: Option<EventStatus>,
    attempt_count: Option<i32>,
    created_at: Option<DateTime<Utc>>,
    next_eligible_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl EventBuilder {
    /// Creates a builder with no fields set.
    pub fn new() -> Self {
        Self {
            event_type: None,
            aggregate_id: None,
            payload: None,
            status: None,
            attempt_count: None,
            created_at: None,
            next_eligible_at: None,
            last_error: None,
        }
    }

    /// Creates a builder preloaded with a realistic paid-order event.
    pub fn with_defaults() -> Self {
        let order_id = random_order_id();
        let amount = rand::rng().random_range(500..50_000);
        Self {
            payload: Some(json!({"orderId": order_id.clone(), "amountCents": amount})),
            aggregate_id: Some(order_id),
            event_type: Some(event_type::ORDER_PAID.to_string()),
            ..Self::new()
        }
    }

    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate the event belongs to.
    #[must_use]
    pub fn aggregate(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Sets the JSON payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the delivery status.
    #[must_use]
    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the completed attempt count.
    #[must_use]
    pub fn attempts(mut self, count: i32) -> Self {
        self.attempt_count = Some(count);
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets when the event next becomes claimable.
    #[must_use]
    pub fn eligible_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_eligible_at = Some(at);
        self
    }

    /// Sets the recorded last delivery error.
    #[must_use]
    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Builds the event row.
    pub fn build(self) -> DomainEvent {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let mut event = DomainEvent::new(
            self.event_type
                .unwrap_or_else(|| event_type::ORDER_PAID.to_string()),
            self.aggregate_id.unwrap_or_else(random_order_id),
            self.payload.unwrap_or_else(|| json!({})),
            created_at,
        );
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(count) = self.attempt_count {
            event.attempt_count = count;
        }
        if let Some(at) = self.next_eligible_at {
            event.next_eligible_at = at;
        }
        event.last_error = self.last_error;
        event
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly published pending event with a random order aggregate.
pub fn pending_event() -> DomainEvent {
    EventBuilder::with_defaults().build()
}

fn random_order_id() -> String {
    format!("order-{}", rand::rng().random_range(1000..10_000))
}
