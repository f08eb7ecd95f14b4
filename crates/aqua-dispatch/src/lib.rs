//! Reliable event dispatch for the Aqua order platform.
//!
//! Events recorded by the order, payment, and delivery services are stored
//! in Postgres and pushed to the message broker by background workers. The
//! stored row is the source of truth; everything else only accelerates it.
//!
//! # Architecture
//!
//! The life of one event:
//!
//! 1. A service publishes through [`EventPublisher`]; the event lands in
//!    Postgres as pending, optionally inside the caller's own transaction.
//! 2. For high-frequency types, a hint is offered to the in-memory queue to
//!    wake a fast worker without waiting for its next poll.
//! 3. Workers claim due events with `FOR UPDATE SKIP LOCKED`, push them to
//!    the broker, and record the outcome.
//! 4. Failed sends are rescheduled on the path's backoff curve until the
//!    attempt budget runs out, then dead-lettered for operator review.
//! 5. A background task purges delivered and dead events past retention.
//!
//! # Key Features
//!
//! - **No lost events**: publishing can join the business transaction, so
//!   an event exists if and only if the change that produced it committed.
//! - **Fast path with a durable floor**: hints cut latency for hot event
//!   types while polling guarantees progress when hints are dropped,
//!   disabled, or lost in a restart.
//! - **Switchable strategy**: hybrid, outbox-only, memory-only, or full
//!   fan-out per deployment, without code changes.
//! - **Deterministic retries**: an exponential curve on the fast path, a
//!   fixed ladder on the durable path, and terminal states that are never
//!   overwritten.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod routing;
pub mod store;
pub mod worker;
pub mod worker_pool;

pub use client::{BrokerClient, HttpBrokerClient};
pub use config::MessagingConfig;
pub use engine::{DispatchEngine, SystemStatus};
pub use error::{DispatchError, Result};
pub use publisher::{EventDraft, EventPublisher};
pub use queue::HintQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use routing::StrategyMode;
pub use store::{EventStore, PostgresEventStore};
pub use worker::EngineStats;

/// Default fast-pool worker count.
pub const DEFAULT_FAST_WORKER_COUNT: usize = 2;

/// Default durable-pool worker count.
pub const DEFAULT_DURABLE_WORKER_COUNT: usize = 1;

/// Default durable-pool claim batch size.
pub const DEFAULT_DURABLE_BATCH_SIZE: usize = 100;

/// Default cap on a single broker send attempt, in seconds.
pub const DEFAULT_SEND_TIMEOUT_SECONDS: u64 = 30;
