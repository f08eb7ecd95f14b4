//! HTTP client for handing events to the message broker.
//!
//! Events are posted as JSON envelopes to a per-destination ingest endpoint.
//! The destination is derived from the event type, so consumers can subscribe
//! to coarse streams (order, payment, delivery) without parsing payloads.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use aqua_core::models::{event_type, DomainEvent, EventId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::error::{DispatchError, Result};

/// Response body bytes preserved in rejection errors.
const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Hands claimed events to the broker.
///
/// Implementations are shared across workers behind an `Arc`, so they must
/// be internally synchronized and cheap to call concurrently.
pub trait BrokerClient: Send + Sync + 'static {
    /// Sends one event. `Ok(())` means the broker acknowledged receipt.
    fn send<'a>(
        &'a self,
        event: &'a DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Broker destination for an event type.
///
/// Total over arbitrary input: unknown types fall back to the user stream
/// rather than failing.
pub fn destination_for(name: &str) -> &'static str {
    if name.starts_with("ORDER_") {
        return "order-events";
    }
    match name {
        event_type::PAYMENT_TIMEOUT => "payment-events",
        event_type::DELIVERY_TIMEOUT => "delivery-events",
        _ => "user-events",
    }
}

/// Connection settings for the HTTP broker client.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base URL of the broker ingest API.
    pub base_url: String,
    /// Hard cap on a single send attempt.
    pub send_timeout: Duration,
    /// Idle connections kept per broker host.
    pub max_connections: usize,
    /// User agent reported to the broker.
    pub user_agent: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8161/api/message".to_string(),
            send_timeout: Duration::from_secs(crate::DEFAULT_SEND_TIMEOUT_SECONDS),
            max_connections: 10,
            user_agent: "Aqua-Messaging/1.0".to_string(),
        }
    }
}

/// Wire format for events handed to the broker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope<'a> {
    id: EventId,
    event_type: &'a str,
    aggregate_id: &'a str,
    occurred_at: DateTime<Utc>,
    payload: &'a serde_json::Value,
}

/// Broker client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBrokerClient {
    client: reqwest::Client,
    config: BrokerConfig,
}

impl HttpBrokerClient {
    /// Creates a client with a shared connection pool.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build broker client: {e}"))
            })?;
        Ok(Self { client, config })
    }

    fn ingest_url(&self, destination: &str) -> String {
        format!("{}/{destination}", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_inner(&self, event: &DomainEvent) -> Result<()> {
        let destination = destination_for(&event.event_type);
        let envelope = EventEnvelope {
            id: event.id,
            event_type: &event.event_type,
            aggregate_id: &event.aggregate_id,
            occurred_at: event.created_at,
            payload: &event.payload.0,
        };

        let response = self
            .client
            .post(self.ingest_url(destination))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::broker_rejected(
            status.as_u16(),
            truncate_body(&body),
        ))
    }

    fn map_send_error(&self, error: &reqwest::Error) -> DispatchError {
        if error.is_timeout() {
            DispatchError::timeout(self.config.send_timeout.as_secs())
        } else if error.is_connect() {
            DispatchError::network(format!("connection failed: {error}"))
        } else {
            DispatchError::network(error.to_string())
        }
    }
}

impl BrokerClient for HttpBrokerClient {
    fn send<'a>(
        &'a self,
        event: &'a DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let span = info_span!(
            "broker_send",
            event_id = %event.id,
            event_type = %event.event_type,
            destination = destination_for(&event.event_type),
            attempt = event.attempt_count + 1,
        );
        Box::pin(self.send_inner(event).instrument(span))
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
