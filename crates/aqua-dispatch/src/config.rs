//! Messaging configuration: strategy, pools, broker, retries.
//!
//! Defaults match production sizing for the order platform. Every knob can
//! be overridden from the environment via [`MessagingConfig::from_env`];
//! unknown or malformed values fail fast instead of being silently ignored.

use std::str::FromStr;
use std::time::Duration;

use aqua_core::models::event_type;
use serde::{Deserialize, Serialize};

use crate::client::BrokerConfig;
use crate::error::{DispatchError, Result};
use crate::retry::RetryPolicy;
use crate::routing::StrategyMode;
use crate::{DEFAULT_DURABLE_BATCH_SIZE, DEFAULT_DURABLE_WORKER_COUNT, DEFAULT_FAST_WORKER_COUNT};

/// Top-level messaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Master switch. When false the engine starts nothing.
    pub enabled: bool,
    /// Which delivery paths run and which event types get hints.
    pub strategy: StrategyMode,
    /// How long shutdown waits for workers to drain.
    pub shutdown_timeout: Duration,
    /// Fast path: hint queue and short-interval workers.
    pub memory_queue: MemoryQueueConfig,
    /// Durable path: long-interval workers and retention.
    pub outbox: OutboxConfig,
    /// Broker endpoint and send behavior.
    pub broker: BrokerSettings,
}

/// Fast-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQueueConfig {
    /// When false, no hints are offered or consumed.
    pub enabled: bool,
    /// Hint buffer capacity. Overflow drops hints, never events.
    pub max_size: usize,
    /// Events claimed per fast-pool poll.
    pub batch_size: usize,
    /// Idle wait between empty fast-pool polls.
    pub poll_interval: Duration,
    /// Fast-pool worker count.
    pub workers: usize,
    /// Event types routed to the fast path.
    pub high_frequency_events: Vec<String>,
    /// Event types routed to the durable path.
    pub low_frequency_events: Vec<String>,
}

/// Durable-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// When false, the durable pool does not run.
    pub enabled: bool,
    /// Idle wait between empty durable-pool polls.
    pub poll_interval: Duration,
    /// Events claimed per durable-pool poll.
    pub batch_size: usize,
    /// Durable-pool worker count.
    pub workers: usize,
    /// Delivery attempts before an event is dead-lettered.
    pub max_retry_count: u32,
    /// Fixed backoff ladder; the last rung repeats.
    pub retry_delays: Vec<Duration>,
    /// How long delivered and dead events are kept.
    pub cleanup_after: Duration,
    /// How often the cleanup task runs.
    pub cleanup_interval: Duration,
}

/// Broker endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Ingest URL of the broker's HTTP bridge.
    pub url: String,
    /// Hard cap on a single send attempt.
    pub send_timeout: Duration,
    /// Connection pool sizing.
    pub pool: BrokerPoolSettings,
    /// Fast-path retry curve for failed sends.
    pub retry: BrokerRetrySettings,
}

/// Broker connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerPoolSettings {
    /// Pooled connections to the broker host.
    pub max_connections: usize,
    /// Sessions multiplexed per connection.
    pub max_sessions_per_connection: usize,
}

/// Fast-path retry curve parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerRetrySettings {
    /// Delivery attempts before giving up.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_interval: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: StrategyMode::Hybrid,
            shutdown_timeout: Duration::from_secs(30),
            memory_queue: MemoryQueueConfig::default(),
            outbox: OutboxConfig::default(),
            broker: BrokerSettings::default(),
        }
    }
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 5000,
            batch_size: 50,
            poll_interval: Duration::from_millis(50),
            workers: DEFAULT_FAST_WORKER_COUNT,
            high_frequency_events: event_type::HIGH_FREQUENCY.map(str::to_string).to_vec(),
            low_frequency_events: event_type::LOW_FREQUENCY.map(str::to_string).to_vec(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
            batch_size: DEFAULT_DURABLE_BATCH_SIZE,
            workers: DEFAULT_DURABLE_WORKER_COUNT,
            max_retry_count: 5,
            retry_delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(3600),
                Duration::from_secs(21600),
            ],
            cleanup_after: Duration::from_secs(30 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8161/api/message".to_string(),
            send_timeout: Duration::from_secs(crate::DEFAULT_SEND_TIMEOUT_SECONDS),
            pool: BrokerPoolSettings::default(),
            retry: BrokerRetrySettings::default(),
        }
    }
}

impl Default for BrokerPoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_sessions_per_connection: 50,
        }
    }
}

impl Default for BrokerRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl MessagingConfig {
    /// Loads the default configuration with environment overrides applied.
    ///
    /// Recognized variables: `MESSAGING_ENABLED`, `MESSAGING_STRATEGY`,
    /// `MEMORY_QUEUE_ENABLED`, `MEMORY_QUEUE_MAX_SIZE`, `OUTBOX_ENABLED`,
    /// `OUTBOX_POLL_INTERVAL_SECS`, `OUTBOX_MAX_RETRY_COUNT`,
    /// `OUTBOX_CLEANUP_DAYS`, `BROKER_URL`, `BROKER_MAX_CONNECTIONS`.
    /// Booleans parse as `true`/`false`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(enabled) = env_parse::<bool>("MESSAGING_ENABLED")? {
            config.enabled = enabled;
        }
        if let Some(strategy) = env_parse::<StrategyMode>("MESSAGING_STRATEGY")? {
            config.strategy = strategy;
        }
        if let Some(enabled) = env_parse::<bool>("MEMORY_QUEUE_ENABLED")? {
            config.memory_queue.enabled = enabled;
        }
        if let Some(size) = env_parse::<usize>("MEMORY_QUEUE_MAX_SIZE")? {
            config.memory_queue.max_size = size;
        }
        if let Some(enabled) = env_parse::<bool>("OUTBOX_ENABLED")? {
            config.outbox.enabled = enabled;
        }
        if let Some(secs) = env_parse::<u64>("OUTBOX_POLL_INTERVAL_SECS")? {
            config.outbox.poll_interval = Duration::from_secs(secs);
        }
        if let Some(count) = env_parse::<u32>("OUTBOX_MAX_RETRY_COUNT")? {
            config.outbox.max_retry_count = count;
        }
        if let Some(days) = env_parse::<u64>("OUTBOX_CLEANUP_DAYS")? {
            config.outbox.cleanup_after = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(url) = env_string("BROKER_URL") {
            config.broker.url = url;
        }
        if let Some(max) = env_parse::<usize>("BROKER_MAX_CONNECTIONS")? {
            config.broker.pool.max_connections = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that could stall or misroute delivery.
    pub fn validate(&self) -> Result<()> {
        if self.memory_queue.max_size == 0 {
            return Err(DispatchError::configuration(
                "memory queue size must be at least 1",
            ));
        }
        if self.memory_queue.batch_size == 0 || self.outbox.batch_size == 0 {
            return Err(DispatchError::configuration("batch size must be at least 1"));
        }
        if self.memory_queue.workers == 0 || self.outbox.workers == 0 {
            return Err(DispatchError::configuration(
                "worker count must be at least 1",
            ));
        }
        if self.memory_queue.poll_interval.is_zero() || self.outbox.poll_interval.is_zero() {
            return Err(DispatchError::configuration(
                "poll interval must be positive",
            ));
        }
        if self.broker.retry.max_attempts == 0 || self.outbox.max_retry_count == 0 {
            return Err(DispatchError::configuration(
                "retry budget must allow at least one attempt",
            ));
        }
        if self.broker.retry.multiplier < 1.0 {
            return Err(DispatchError::configuration(
                "backoff multiplier must be at least 1.0",
            ));
        }
        if self.broker.retry.initial_interval.is_zero() {
            return Err(DispatchError::configuration(
                "initial retry interval must be positive",
            ));
        }
        if self.outbox.retry_delays.is_empty() {
            return Err(DispatchError::configuration(
                "outbox retry ladder must not be empty",
            ));
        }
        if self.outbox.cleanup_interval.is_zero() {
            return Err(DispatchError::configuration(
                "cleanup interval must be positive",
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(DispatchError::configuration(
                "shutdown timeout must be positive",
            ));
        }
        if self.broker.url.trim().is_empty() {
            return Err(DispatchError::configuration("broker url must not be empty"));
        }
        if self.broker.pool.max_connections == 0
            || self.broker.pool.max_sessions_per_connection == 0
        {
            return Err(DispatchError::configuration(
                "broker pool sizes must be at least 1",
            ));
        }
        Ok(())
    }

    /// Retry policy applied by fast-pool workers.
    pub fn fast_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.broker.retry.max_attempts,
            self.broker.retry.initial_interval,
            self.broker.retry.multiplier,
            self.broker.retry.max_interval,
        )
    }

    /// Retry policy applied by durable-pool workers.
    pub fn durable_policy(&self) -> RetryPolicy {
        RetryPolicy::ladder(self.outbox.max_retry_count, self.outbox.retry_delays.clone())
    }

    /// Client settings for the broker's HTTP bridge.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            base_url: self.broker.url.clone(),
            send_timeout: self.broker.send_timeout,
            max_connections: self.broker.pool.max_connections,
            ..BrokerConfig::default()
        }
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw.trim().parse::<T>().map_err(|error| {
                DispatchError::configuration(format!("invalid value for {name}: {raw} ({error})"))
            })?;
            Ok(Some(value))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(DispatchError::configuration(format!(
            "invalid value for {name}: not valid unicode"
        ))),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
