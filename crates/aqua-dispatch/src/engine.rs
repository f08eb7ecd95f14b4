//! Dispatch engine: owns the worker pools and background maintenance.
//!
//! The engine wires the configured strategy to concrete pools. Depending on
//! the strategy it runs a fast pool (short poll interval, woken by hints), a
//! durable pool (long poll interval, catches everything the fast path
//! missed), or both over the same event table. A cleanup task purges old
//! terminal events on a fixed cadence.

use std::collections::HashMap;
use std::sync::Arc;

use aqua_core::models::EventStatus;
use aqua_core::time::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::BrokerClient;
use crate::config::MessagingConfig;
use crate::error::{DispatchError, Result};
use crate::queue::HintQueue;
use crate::retry::RetryPolicy;
use crate::store::EventStore;
use crate::worker::{DispatchWorker, EngineStats, PoolSettings, WorkerContext};
use crate::worker_pool::WorkerPool;

/// Point-in-time snapshot of the dispatch system for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Active messaging strategy.
    pub strategy: String,
    /// True while at least one worker task is running.
    pub workers_running: bool,
    /// Fast-pool worker count, zero when the pool is not running.
    pub fast_workers: usize,
    /// Durable-pool worker count, zero when the pool is not running.
    pub durable_workers: usize,
    /// Hints currently buffered.
    pub hint_queue_depth: usize,
    /// Hint buffer capacity.
    pub hint_queue_capacity: usize,
    /// Hints dropped because the buffer was full.
    pub dropped_hints: u64,
    /// Broker connection pool size.
    pub max_broker_connections: usize,
    /// Sessions multiplexed per broker connection.
    pub max_sessions_per_connection: usize,
    /// Retry policy applied on the fast path.
    pub fast_retry: RetryPolicy,
    /// Retry policy applied on the durable path.
    pub durable_retry: RetryPolicy,
    /// Events per status in the store.
    pub status_counts: HashMap<EventStatus, i64>,
    /// Engine counters since startup.
    pub stats: EngineStats,
}

/// Coordinates worker pools, the hint queue, and periodic cleanup.
pub struct DispatchEngine {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn BrokerClient>,
    hints: HintQueue,
    config: MessagingConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    fast_pool: Option<WorkerPool>,
    durable_pool: Option<WorkerPool>,
    cleanup_handle: Option<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
    started: bool,
}

impl DispatchEngine {
    /// Creates an engine. No tasks run until [`DispatchEngine::start`].
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Arc<dyn BrokerClient>,
        hints: HintQueue,
        config: MessagingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            broker,
            hints,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            fast_pool: None,
            durable_pool: None,
            cleanup_handle: None,
            clock,
            started: false,
        }
    }

    /// Starts the pools the strategy calls for, plus the cleanup task.
    ///
    /// A disabled configuration starts nothing and returns `Ok`. Calling
    /// start twice is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.enabled {
            info!("messaging disabled, dispatch engine not started");
            return Ok(());
        }
        if self.cancellation_token.is_cancelled() {
            return Err(DispatchError::ShutdownRequested);
        }
        if self.started {
            warn!("dispatch engine already started");
            return Ok(());
        }

        info!(strategy = %self.config.strategy, "starting dispatch engine");

        if self.config.strategy.runs_fast_pool() {
            let settings = PoolSettings {
                workers: self.config.memory_queue.workers,
                batch_size: self.config.memory_queue.batch_size,
                poll_interval: self.config.memory_queue.poll_interval,
            };
            let hints = self.config.memory_queue.enabled.then(|| self.hints.clone());
            let ctx = self.worker_ctx(self.config.fast_policy(), hints);
            let mut pool = WorkerPool::new("fast", settings, ctx);
            pool.spawn_workers().await;
            self.fast_pool = Some(pool);
        }

        if self.config.strategy.runs_durable_pool() && self.config.outbox.enabled {
            let settings = PoolSettings {
                workers: self.config.outbox.workers,
                batch_size: self.config.outbox.batch_size,
                poll_interval: self.config.outbox.poll_interval,
            };
            let ctx = self.worker_ctx(self.config.durable_policy(), None);
            let mut pool = WorkerPool::new("durable", settings, ctx);
            pool.spawn_workers().await;
            self.durable_pool = Some(pool);
        }

        self.cleanup_handle = Some(self.spawn_cleanup_task());
        self.started = true;
        Ok(())
    }

    /// Stops everything: cancels the tasks and waits for pools to drain.
    ///
    /// Both pools are drained even when the first one reports an error; the
    /// first error wins.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down dispatch engine");
        self.cancellation_token.cancel();

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(error) = handle.await {
                warn!(error = %error, "cleanup task join failed");
            }
        }

        let timeout = self.config.shutdown_timeout;
        let mut first_error = None;

        if let Some(pool) = self.fast_pool.take() {
            if let Err(error) = pool.shutdown_graceful(timeout).await {
                error!(error = %error, "fast pool shutdown failed");
                first_error.get_or_insert(error);
            }
        }
        if let Some(pool) = self.durable_pool.take() {
            if let Err(error) = pool.shutdown_graceful(timeout).await {
                error!(error = %error, "durable pool shutdown failed");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                info!("dispatch engine stopped");
                Ok(())
            }
        }
    }

    /// True between a successful start and shutdown.
    pub fn is_running(&self) -> bool {
        self.started && !self.cancellation_token.is_cancelled()
    }

    /// Running and able to reach the event store.
    pub async fn is_healthy(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.store.health_check().await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "event store health check failed");
                false
            }
        }
    }

    /// Current engine counters.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Snapshot of pools, hint queue, and per-status event counts.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let status_counts = self.store.count_by_status().await?;
        let stats = self.stats.read().await.clone();

        Ok(SystemStatus {
            strategy: self.config.strategy.to_string(),
            workers_running: self.workers_running(),
            fast_workers: self
                .fast_pool
                .as_ref()
                .map(WorkerPool::worker_count)
                .unwrap_or(0),
            durable_workers: self
                .durable_pool
                .as_ref()
                .map(WorkerPool::worker_count)
                .unwrap_or(0),
            hint_queue_depth: self.hints.depth(),
            hint_queue_capacity: self.hints.capacity(),
            dropped_hints: self.hints.dropped_hints(),
            max_broker_connections: self.config.broker.pool.max_connections,
            max_sessions_per_connection: self.config.broker.pool.max_sessions_per_connection,
            fast_retry: self.config.fast_policy(),
            durable_retry: self.config.durable_policy(),
            status_counts,
            stats,
        })
    }

    /// Returns dead-lettered events to the pending queue.
    ///
    /// With a `before` cutoff only events dead-lettered before that time are
    /// requeued; `None` requeues all of them. Returns the number of events
    /// reset.
    pub async fn retry_dead_letters(&self, before: Option<DateTime<Utc>>) -> Result<u64> {
        let requeued = self
            .store
            .retry_dead_letters(before, self.clock.now_utc())
            .await?;
        if requeued > 0 {
            info!(requeued, "dead-lettered events returned to pending");
        }
        Ok(requeued)
    }

    /// Claims and processes one durable-path batch on the caller's task.
    ///
    /// Works whether or not background pools are running. Intended for tests
    /// and manual drains.
    pub async fn process_batch(&self) -> Result<usize> {
        let settings = PoolSettings {
            workers: 1,
            batch_size: self.config.outbox.batch_size,
            poll_interval: self.config.outbox.poll_interval,
        };
        let worker = DispatchWorker::new(
            0,
            "inline",
            settings,
            self.worker_ctx(self.config.durable_policy(), None),
        );
        worker.process_batch().await
    }

    fn worker_ctx(&self, policy: RetryPolicy, hints: Option<HintQueue>) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            broker: self.broker.clone(),
            policy,
            send_timeout: self.config.broker.send_timeout,
            hints,
            stats: self.stats.clone(),
            cancellation_token: self.cancellation_token.child_token(),
            clock: self.clock.clone(),
        }
    }

    fn workers_running(&self) -> bool {
        self.fast_pool
            .as_ref()
            .is_some_and(WorkerPool::has_active_workers)
            || self
                .durable_pool
                .as_ref()
                .is_some_and(WorkerPool::has_active_workers)
    }

    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let token = self.cancellation_token.child_token();
        let interval = self.config.outbox.cleanup_interval;
        let retention = self.config.outbox.cleanup_after;

        tokio::spawn(async move {
            let Ok(retention) = chrono::Duration::from_std(retention) else {
                warn!("terminal event retention out of range, cleanup task not running");
                return;
            };
            info!(
                interval_seconds = interval.as_secs(),
                retention_seconds = retention.num_seconds(),
                "cleanup task started"
            );
            loop {
                tokio::select! {
                    () = clock.sleep(interval) => {}
                    () = token.cancelled() => break,
                }
                let cutoff = clock.now_utc() - retention;
                match store.cleanup(cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "purged old terminal events"),
                    Err(error) => warn!(error = %error, "terminal event cleanup failed"),
                }
            }
            info!("cleanup task stopped");
        })
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        if self.started && !self.cancellation_token.is_cancelled() {
            warn!("dispatch engine dropped without shutdown, cancelling tasks");
            self.cancellation_token.cancel();
        }
    }
}
