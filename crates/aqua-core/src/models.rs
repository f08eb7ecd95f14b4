//! Core domain models for reliable event delivery.
//!
//! Defines the strongly-typed event identifier, the persisted event record,
//! its lifecycle states, and the well-known event type names published by the
//! order platform.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult = Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Unique identifier for a domain event.
///
/// # Examples
///
/// ```
/// use aqua_core::models::EventId;
///
/// let id = EventId::new();
/// assert_ne!(id, EventId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generates a new random event identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Lifecycle state of a persisted domain event.
///
/// Events move from `Pending` to `InFlight` when a worker claims them, then
/// to `Delivered` on broker acknowledgement, back to `Pending` when a retry
/// is scheduled, or to `Dead` once retries are exhausted. `Delivered` and
/// `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting to be claimed for delivery.
    Pending,
    /// Claimed by a dispatch worker, delivery attempt in progress.
    InFlight,
    /// Acknowledged by the broker. Terminal.
    Delivered,
    /// Retries exhausted or failure was permanent. Terminal.
    Dead,
}

impl EventStatus {
    /// Returns true for states that no delivery attempt may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Dead)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "delivered" => Ok(Self::Delivered),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("invalid event status: {s}").into()),
        }
    }
}

/// A domain event persisted in the transactional outbox.
///
/// The record is the unit of reliability: once inserted, the dispatch engine
/// guarantees at-least-once delivery to the broker or an explicit move to the
/// dead-letter state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DomainEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Business event type, e.g. `ORDER_PAID`.
    pub event_type: String,
    /// Identifier of the aggregate the event belongs to, e.g. an order id.
    pub aggregate_id: String,
    /// Arbitrary JSON payload carried to consumers unchanged.
    pub payload: Json<serde_json::Value>,
    /// Current lifecycle state.
    pub status: EventStatus,
    /// Number of completed delivery attempts.
    pub attempt_count: i32,
    /// Message of the most recent delivery failure, if any.
    pub last_error: Option<String>,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
    /// Earliest time a worker may claim the event. Equals `created_at` until
    /// a retry is scheduled.
    pub next_eligible_at: DateTime<Utc>,
    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Creates a pending event ready for insertion.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload: Json(payload),
            status: EventStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at,
            next_eligible_at: created_at,
            updated_at: created_at,
        }
    }
}

/// Well-known event type names published by the order platform.
pub mod event_type {
    /// A new order was placed.
    pub const ORDER_CREATED: &str = "ORDER_CREATED";
    /// Payment for an order completed.
    pub const ORDER_PAID: &str = "ORDER_PAID";
    /// An order was cancelled.
    pub const ORDER_CANCELLED: &str = "ORDER_CANCELLED";
    /// An order was assigned to a courier.
    pub const ORDER_ASSIGNED: &str = "ORDER_ASSIGNED";
    /// An order reached the customer.
    pub const ORDER_DELIVERED: &str = "ORDER_DELIVERED";
    /// Payment was not completed in time.
    pub const PAYMENT_TIMEOUT: &str = "PAYMENT_TIMEOUT";
    /// Delivery was not completed in time.
    pub const DELIVERY_TIMEOUT: &str = "DELIVERY_TIMEOUT";

    /// Latency-sensitive event types routed through the fast path by default.
    pub const HIGH_FREQUENCY: [&str; 3] = [ORDER_PAID, PAYMENT_TIMEOUT, DELIVERY_TIMEOUT];

    /// Event types that tolerate polling latency and default to the durable path.
    pub const LOW_FREQUENCY: [&str; 3] = [ORDER_CREATED, ORDER_CANCELLED, ORDER_DELIVERED];
}
