//! Error types for event dispatch.
//!
//! [`DispatchError::is_retryable`] is the single source of truth for the
//! transient/permanent split: retry scheduling consults it before deciding
//! between rescheduling an event and dead-lettering it.

use std::time::Duration;

use aqua_core::CoreError;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced while publishing or delivering domain events.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Broker could not be reached.
    #[error("network connection failed: {message}")]
    Network {
        /// Transport failure detail.
        message: String,
    },

    /// A delivery attempt exceeded the per-attempt time budget.
    #[error("broker send timed out after {timeout_seconds}s")]
    Timeout {
        /// Configured attempt timeout in seconds.
        timeout_seconds: u64,
    },

    /// Broker answered with a non-success status.
    #[error("broker rejected event: HTTP {status_code}")]
    BrokerRejected {
        /// HTTP status returned by the broker.
        status_code: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// Event payload could not be serialized to JSON.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Serializer failure detail.
        message: String,
    },

    /// Event store operation failed.
    #[error("event store error: {source}")]
    Store {
        /// Underlying store failure.
        #[from]
        source: CoreError,
    },

    /// Fast-path hint queue is at capacity.
    #[error("hint queue full")]
    QueueFull,

    /// Operation interrupted because the engine is shutting down.
    #[error("shutdown requested")]
    ShutdownRequested,

    /// Invalid messaging configuration.
    #[error("invalid messaging configuration: {message}")]
    Configuration {
        /// What failed validation.
        message: String,
    },

    /// A dispatch worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Identifier of the panicked worker.
        worker_id: usize,
        /// Panic message.
        error: String,
    },

    /// Workers did not drain within the shutdown deadline.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl DispatchError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a broker rejection error.
    pub fn broker_rejected(status_code: u16, body: impl Into<String>) -> Self {
        Self::BrokerRejected {
            status_code,
            body: body.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether another delivery attempt could plausibly succeed.
    ///
    /// Broker rejections count as transient only for 408, 429, and server
    /// errors; other client errors indicate the event itself is the problem.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Store { .. } => true,
            Self::BrokerRejected { status_code, .. } => {
                matches!(status_code, 408 | 429) || (500..=599).contains(status_code)
            }
            Self::Serialization { .. }
            | Self::QueueFull
            | Self::ShutdownRequested
            | Self::Configuration { .. }
            | Self::WorkerPanic { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retryable() {
        assert!(DispatchError::network("connection refused").is_retryable());
        assert!(DispatchError::timeout(30).is_retryable());
        assert!(DispatchError::Store {
            source: CoreError::Database("connection reset".into())
        }
        .is_retryable());
    }

    #[test]
    fn broker_rejections_split_by_status() {
        assert!(DispatchError::broker_rejected(500, "").is_retryable());
        assert!(DispatchError::broker_rejected(503, "").is_retryable());
        assert!(DispatchError::broker_rejected(408, "").is_retryable());
        assert!(DispatchError::broker_rejected(429, "").is_retryable());

        assert!(!DispatchError::broker_rejected(400, "").is_retryable());
        assert!(!DispatchError::broker_rejected(404, "").is_retryable());
        assert!(!DispatchError::broker_rejected(422, "").is_retryable());
    }

    #[test]
    fn poison_and_lifecycle_errors_are_permanent() {
        assert!(!DispatchError::serialization("bad payload").is_retryable());
        assert!(!DispatchError::QueueFull.is_retryable());
        assert!(!DispatchError::ShutdownRequested.is_retryable());
        assert!(!DispatchError::configuration("bad strategy").is_retryable());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DispatchError::timeout(30).to_string(),
            "broker send timed out after 30s"
        );
        assert_eq!(
            DispatchError::broker_rejected(503, "overloaded").to_string(),
            "broker rejected event: HTTP 503"
        );
    }
}
