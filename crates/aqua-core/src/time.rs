//! Clock abstraction for deterministic scheduling.
//!
//! Retry eligibility, claim cutoffs, and cleanup retention are all computed
//! from timestamps. Production code uses [`RealClock`]; tests use
//! [`TestClock`] to move time instantly instead of sleeping.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of time for scheduling decisions.
///
/// Implementations must be cheap to call; workers consult the clock on every
/// poll iteration.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time as a UTC timestamp, the form stored in the
    /// event table.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration, or returns immediately under test
    /// clocks after advancing time.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually controlled clock for tests.
///
/// Time is a fixed origin plus an offset that only moves through
/// [`advance`](TestClock::advance). `sleep` advances the offset by the
/// requested duration and yields once, so polling loops make progress
/// without real delays. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct TestClock {
    origin: DateTime<Utc>,
    offset_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates a test clock anchored at the given instant.
    pub fn at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            offset_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Moves time forward. Durations beyond the millisecond range saturate.
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.origin + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
