//! Bounded in-memory hint queue for the fast delivery path.
//!
//! Hints are wake-up signals, not the source of truth: the durable store
//! decides what actually gets delivered. Because of that, overflow drops the
//! hint instead of blocking the publisher, and a dropped hint costs nothing
//! but polling latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aqua_core::models::EventId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;

use crate::error::{DispatchError, Result};

/// Shared handle to the hint channel between publishers and fast workers.
///
/// Clones share the same buffer, counters, and receiver.
#[derive(Debug, Clone)]
pub struct HintQueue {
    tx: mpsc::Sender<EventId>,
    rx: Arc<Mutex<mpsc::Receiver<EventId>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl HintQueue {
    /// Creates a queue buffering at most `capacity` hints.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offers a hint without blocking.
    ///
    /// Returns [`DispatchError::QueueFull`] when the buffer is at capacity;
    /// the hint is counted as dropped and the event stays reachable through
    /// durable polling.
    pub fn offer(&self, id: EventId) -> Result<()> {
        match self.tx.try_send(id) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::ShutdownRequested),
        }
    }

    /// Waits for the next hint.
    ///
    /// Safe to call from several workers at once; each hint wakes exactly one
    /// of them.
    pub async fn next_hint(&self) -> Option<EventId> {
        self.rx.lock().await.recv().await
    }

    /// Number of hints currently buffered.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Maximum number of buffered hints.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hints dropped because the buffer was full.
    pub fn dropped_hints(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
