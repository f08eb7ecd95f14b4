//! Retry scheduling for failed delivery attempts.
//!
//! Delay computation is pure: [`RetryPolicy::next_delay`] maps an attempt
//! count to a wait duration without touching clocks or stores. Workers feed
//! the result through [`RetryContext::decide_retry`] to choose between
//! rescheduling an event and giving up on it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DispatchError;

/// Exponent clamp preventing overflow for unbounded attempt counts.
const MAX_EXPONENT: u32 = 20;

/// Shape of the delay sequence between attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BackoffCurve {
    /// `initial * multiplier^attempt_count`, capped at `max`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Growth factor per attempt, at least 1.0.
        multiplier: f64,
        /// Upper bound on any single delay.
        max: Duration,
    },
    /// Fixed delay steps indexed by attempt count; counts past the end reuse
    /// the final step.
    Ladder(Vec<Duration>),
}

/// Retry budget and backoff curve for one delivery path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Failures tolerated before an event is dead-lettered.
    pub max_attempts: u32,
    /// Delay sequence between attempts.
    pub curve: BackoffCurve,
}

impl RetryPolicy {
    /// Creates an exponential backoff policy.
    pub fn exponential(max_attempts: u32, initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            max_attempts,
            curve: BackoffCurve::Exponential {
                initial,
                multiplier,
                max,
            },
        }
    }

    /// Creates a fixed-ladder policy.
    pub fn ladder(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            curve: BackoffCurve::Ladder(delays),
        }
    }

    /// Delay to wait after `attempt_count` completed attempts.
    pub fn next_delay(&self, attempt_count: u32) -> Duration {
        match &self.curve {
            BackoffCurve::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt_count.min(MAX_EXPONENT);
                let scaled = initial.as_secs_f64() * multiplier.powi(exponent as i32);
                if !scaled.is_finite() {
                    return *max;
                }
                Duration::try_from_secs_f64(scaled).map_or(*max, |delay| delay.min(*max))
            }
            BackoffCurve::Ladder(delays) => {
                let index = (attempt_count as usize).min(delays.len().saturating_sub(1));
                delays.get(index).copied().unwrap_or(Duration::ZERO)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), 2.0, Duration::from_secs(30))
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Reschedule the event for another attempt.
    Retry {
        /// Earliest time the next attempt may run.
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying and dead-letter the event.
    GiveUp {
        /// Human-readable explanation recorded in logs.
        reason: String,
    },
}

/// Everything needed to decide the fate of one failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Completed delivery attempts before the one that just failed.
    pub attempt_count: u32,
    /// Error produced by the failed attempt.
    pub error: DispatchError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Policy governing this delivery path.
    pub policy: RetryPolicy,
}

impl RetryContext {
    /// Creates a retry context for a failed attempt.
    pub fn new(
        attempt_count: u32,
        error: DispatchError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            attempt_count,
            error,
            failed_at,
            policy,
        }
    }

    /// Chooses between rescheduling and dead-lettering.
    ///
    /// Gives up when the attempt budget is exhausted or the error is
    /// permanent; otherwise schedules the next attempt relative to the
    /// failure time.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.attempt_count >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!(
                    "maximum attempts ({}) exhausted",
                    self.policy.max_attempts
                ),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        let delay = self.policy.next_delay(self.attempt_count);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay out of range".to_string(),
            };
        };

        RetryDecision::Retry {
            next_attempt_at: self.failed_at + chrono_delay,
        }
    }
}
