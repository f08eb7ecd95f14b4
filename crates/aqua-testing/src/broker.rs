//! Broker doubles for dispatch tests.
//!
//! All doubles implement [`BrokerClient`] and are safe to share across
//! worker tasks. Locks are only held between await points, never across
//! them.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use aqua_core::models::DomainEvent;
use aqua_dispatch::{BrokerClient, DispatchError};

type SendFuture<'a> = Pin<Box<dyn Future<Output = aqua_dispatch::Result<()>> + Send + 'a>>;

/// Accepts and records every send, except for aggregates marked as failing.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    sent: Mutex<Vec<DomainEvent>>,
    failing_aggregates: Mutex<HashSet<String>>,
}

impl RecordingBroker {
    /// Creates a broker that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send for this aggregate fail with a network error.
    pub fn fail_aggregate(&self, aggregate_id: impl Into<String>) {
        self.failing_aggregates
            .lock()
            .unwrap()
            .insert(aggregate_id.into());
    }

    /// Accepted events, in send order.
    pub fn sent(&self) -> Vec<DomainEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of accepted events.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl BrokerClient for RecordingBroker {
    fn send<'a>(&'a self, event: &'a DomainEvent) -> SendFuture<'a> {
        Box::pin(async move {
            let failing = self
                .failing_aggregates
                .lock()
                .unwrap()
                .contains(&event.aggregate_id);
            if failing {
                return Err(DispatchError::network(format!(
                    "injected failure for {}",
                    event.aggregate_id
                )));
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// Fails every send with one configured error.
#[derive(Debug)]
pub struct FailingBroker {
    error: DispatchError,
}

impl FailingBroker {
    /// Fails every send with a retryable network error.
    pub fn network() -> Self {
        Self {
            error: DispatchError::network("injected network failure"),
        }
    }

    /// Fails every send as if the broker returned the given HTTP status.
    pub fn rejecting(status_code: u16) -> Self {
        Self {
            error: DispatchError::broker_rejected(status_code, "injected rejection"),
        }
    }

    /// Fails every send with the given error.
    pub fn with_error(error: DispatchError) -> Self {
        Self { error }
    }
}

impl Default for FailingBroker {
    fn default() -> Self {
        Self::network()
    }
}

impl BrokerClient for FailingBroker {
    fn send<'a>(&'a self, _event: &'a DomainEvent) -> SendFuture<'a> {
        Box::pin(async move { Err(self.error.clone()) })
    }
}

/// Fails the first N sends with a network error, then accepts and records.
#[derive(Debug, Default)]
pub struct FlakyBroker {
    remaining_failures: AtomicU32,
    sent: Mutex<Vec<DomainEvent>>,
}

impl FlakyBroker {
    /// Creates a broker that fails the first `failures` sends.
    pub fn failing_first(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Events accepted after the failure budget was spent.
    pub fn sent(&self) -> Vec<DomainEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of accepted events.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl BrokerClient for FlakyBroker {
    fn send<'a>(&'a self, event: &'a DomainEvent) -> SendFuture<'a> {
        Box::pin(async move {
            let consumed_failure = self
                .remaining_failures
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if consumed_failure {
                return Err(DispatchError::network("transient failure"));
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}
