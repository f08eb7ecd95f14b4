//! Worker pool lifecycle: spawn, watch, drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{DispatchError, Result};
use crate::worker::{DispatchWorker, PoolSettings, WorkerContext};

/// A named set of dispatch workers sharing one cancellation scope.
///
/// The pool owns the spawned worker tasks. Dropping it without calling
/// [`WorkerPool::shutdown_graceful`] cancels the workers but does not wait
/// for them.
pub struct WorkerPool {
    name: &'static str,
    settings: PoolSettings,
    ctx: WorkerContext,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates an empty pool. Workers start on [`WorkerPool::spawn_workers`].
    pub fn new(name: &'static str, settings: PoolSettings, ctx: WorkerContext) -> Self {
        Self {
            name,
            settings,
            ctx,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns the configured number of workers onto the runtime.
    pub async fn spawn_workers(&mut self) {
        info!(
            pool = self.name,
            workers = self.settings.workers,
            batch_size = self.settings.batch_size,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "starting worker pool"
        );

        {
            let mut stats = self.ctx.stats.write().await;
            stats.active_workers += self.settings.workers;
        }

        for id in 0..self.settings.workers {
            let worker =
                DispatchWorker::new(id, self.name, self.settings.clone(), self.ctx.clone());
            let pool_name = self.name;
            let handle = tokio::spawn(async move {
                if let Err(error) = worker.run().await {
                    error!(
                        worker_id = id,
                        pool = pool_name,
                        error = %error,
                        "worker exited with error"
                    );
                }
            });
            self.worker_handles.push(handle);
        }
    }

    /// Number of workers this pool was sized for.
    pub fn worker_count(&self) -> usize {
        self.settings.workers
    }

    /// True while any spawned worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles
            .iter()
            .any(|handle| !handle.is_finished())
    }

    /// Stops the pool: cancels its token and waits for every worker to drain.
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] when workers are still
    /// running after `timeout`, and [`DispatchError::WorkerPanic`] when a
    /// worker task panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(pool = self.name, "shutting down worker pool");
        self.ctx.cancellation_token.cancel();

        let name = self.name;
        let workers = self.settings.workers;
        let stats = self.ctx.stats.clone();
        let handles = std::mem::take(&mut self.worker_handles);

        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                handle
                    .await
                    .map_err(|join_error| DispatchError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    })?;
            }
            Ok::<(), DispatchError>(())
        };

        let joined = tokio::time::timeout(timeout, join_all)
            .await
            .map_err(|_| DispatchError::ShutdownTimeout { timeout })?;

        {
            let mut stats = stats.write().await;
            stats.active_workers = stats.active_workers.saturating_sub(workers);
        }

        joined?;
        info!(pool = name, "worker pool stopped");
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.worker_handles.is_empty() && !self.ctx.cancellation_token.is_cancelled() {
            warn!(
                pool = self.name,
                "worker pool dropped without shutdown, cancelling workers"
            );
            self.ctx.cancellation_token.cancel();
        }
    }
}
