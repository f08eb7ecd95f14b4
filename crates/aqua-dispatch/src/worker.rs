//! Dispatch workers: claim, send, record.
//!
//! A worker repeatedly claims a batch of eligible events, pushes each one to
//! the broker, and records the outcome in the store. One event's failure
//! never aborts the rest of its batch, and every failure ends in exactly one
//! of two places: a rescheduled pending record or the dead-letter state.

use std::sync::Arc;
use std::time::Duration;

use aqua_core::models::DomainEvent;
use aqua_core::time::Clock;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::BrokerClient;
use crate::error::{DispatchError, Result};
use crate::queue::HintQueue;
use crate::retry::{RetryContext, RetryDecision, RetryPolicy};
use crate::store::EventStore;

/// Pause after a failed claim before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Sizing and cadence for one worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSettings {
    /// Number of worker tasks.
    pub workers: usize,
    /// Maximum events claimed per poll.
    pub batch_size: usize,
    /// Idle wait between empty polls.
    pub poll_interval: Duration,
}

/// Counters shared by all workers of an engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Worker tasks currently running.
    pub active_workers: usize,
    /// Events claimed and processed to an outcome.
    pub events_processed: u64,
    /// Events acknowledged by the broker.
    pub events_delivered: u64,
    /// Failed attempts that were rescheduled.
    pub events_rescheduled: u64,
    /// Events moved to the dead-letter state.
    pub events_dead_lettered: u64,
    /// Delivery attempts currently in progress.
    pub in_flight_deliveries: u64,
}

/// Dependencies shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerContext {
    /// Event store the pool drains.
    pub store: Arc<dyn EventStore>,
    /// Broker client used for sends.
    pub broker: Arc<dyn BrokerClient>,
    /// Retry policy applied to failures on this path.
    pub policy: RetryPolicy,
    /// Hard cap on a single send attempt.
    pub send_timeout: Duration,
    /// Hint queue to wake on, if this pool listens for hints.
    pub hints: Option<HintQueue>,
    /// Shared engine counters.
    pub stats: Arc<RwLock<EngineStats>>,
    /// Token observed for shutdown.
    pub cancellation_token: CancellationToken,
    /// Time source for scheduling decisions.
    pub clock: Arc<dyn Clock>,
}

enum EventOutcome {
    Delivered,
    Rescheduled,
    Dead,
}

/// A single dispatch worker.
pub struct DispatchWorker {
    id: usize,
    pool_name: &'static str,
    settings: PoolSettings,
    ctx: WorkerContext,
}

impl DispatchWorker {
    /// Creates a worker bound to one pool's settings and shared context.
    pub fn new(
        id: usize,
        pool_name: &'static str,
        settings: PoolSettings,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            id,
            pool_name,
            settings,
            ctx,
        }
    }

    /// Runs the poll loop until shutdown is requested.
    ///
    /// An empty poll waits for the pool's interval or a hint, whichever
    /// comes first. A non-empty poll immediately polls again, draining
    /// backlogs at full speed.
    pub async fn run(&self) -> Result<()> {
        info!(
            worker_id = self.id,
            pool = self.pool_name,
            "dispatch worker starting"
        );

        loop {
            if self.ctx.cancellation_token.is_cancelled() {
                info!(
                    worker_id = self.id,
                    pool = self.pool_name,
                    "dispatch worker stopping"
                );
                break;
            }

            match self.process_batch().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.ctx.clock.sleep(self.settings.poll_interval) => {}
                        () = self.wait_for_hint() => {}
                        () = self.ctx.cancellation_token.cancelled() => break,
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        pool = self.pool_name,
                        error = %error,
                        "batch processing failed"
                    );
                    tokio::select! {
                        () = self.ctx.clock.sleep(ERROR_BACKOFF) => {}
                        () = self.ctx.cancellation_token.cancelled() => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Claims and processes one batch. Returns the number of claimed events.
    pub async fn process_batch(&self) -> Result<usize> {
        let now = self.ctx.clock.now_utc();
        let events = self
            .ctx
            .store
            .claim_next_batch(self.settings.batch_size, now)
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        debug!(
            worker_id = self.id,
            pool = self.pool_name,
            count = events.len(),
            "claimed events for delivery"
        );

        let claimed = events.len();
        for event in events {
            if self.ctx.cancellation_token.is_cancelled() {
                warn!(
                    worker_id = self.id,
                    pool = self.pool_name,
                    event_id = %event.id,
                    "shutdown mid-batch, remaining events stay claimed until restart"
                );
                break;
            }
            if let Err(error) = self.process_event(&event).await {
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    error = %error,
                    "event processing failed"
                );
            }
        }

        Ok(claimed)
    }

    async fn wait_for_hint(&self) {
        match &self.ctx.hints {
            Some(hints) => {
                hints.next_hint().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn process_event(&self, event: &DomainEvent) -> Result<()> {
        {
            let mut stats = self.ctx.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let result = self.deliver_and_record(event).await;

        let mut stats = self.ctx.stats.write().await;
        stats.in_flight_deliveries = stats.in_flight_deliveries.saturating_sub(1);
        if let Ok(outcome) = &result {
            stats.events_processed += 1;
            match outcome {
                EventOutcome::Delivered => stats.events_delivered += 1,
                EventOutcome::Rescheduled => stats.events_rescheduled += 1,
                EventOutcome::Dead => stats.events_dead_lettered += 1,
            }
        }

        result.map(|_| ())
    }

    async fn deliver_and_record(&self, event: &DomainEvent) -> Result<EventOutcome> {
        match self.attempt_send(event).await {
            Ok(()) => {
                let now = self.ctx.clock.now_utc();
                self.ctx.store.mark_delivered(event.id, now).await?;
                info!(
                    worker_id = self.id,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempt = event.attempt_count + 1,
                    "event delivered"
                );
                Ok(EventOutcome::Delivered)
            }
            Err(error) => self.handle_failed_send(event, error).await,
        }
    }

    async fn attempt_send(&self, event: &DomainEvent) -> Result<()> {
        match tokio::time::timeout(self.ctx.send_timeout, self.ctx.broker.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::timeout(self.ctx.send_timeout.as_secs())),
        }
    }

    async fn handle_failed_send(
        &self,
        event: &DomainEvent,
        error: DispatchError,
    ) -> Result<EventOutcome> {
        let failed_at = self.ctx.clock.now_utc();
        let attempts_before = u32::try_from(event.attempt_count).unwrap_or(0);
        let retry = RetryContext::new(
            attempts_before,
            error.clone(),
            failed_at,
            self.ctx.policy.clone(),
        );

        match retry.decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                self.ctx
                    .store
                    .mark_failed(
                        event.id,
                        event.attempt_count + 1,
                        next_attempt_at,
                        error.to_string(),
                        failed_at,
                    )
                    .await?;
                warn!(
                    worker_id = self.id,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempt = event.attempt_count + 1,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "delivery failed, retry scheduled"
                );
                Ok(EventOutcome::Rescheduled)
            }
            RetryDecision::GiveUp { reason } => {
                self.ctx
                    .store
                    .mark_dead(event.id, error.to_string(), failed_at)
                    .await?;
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempts = event.attempt_count + 1,
                    reason = %reason,
                    error = %error,
                    "delivery abandoned, event dead-lettered"
                );
                Ok(EventOutcome::Dead)
            }
        }
    }
}
